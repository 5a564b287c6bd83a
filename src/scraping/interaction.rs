//! Low-risk human-like interaction performed before a browser page is read.

use crate::features::antibot::RequestDelay;
use crate::scraping::browser_manager::PageHandle;
use rand::distr::{Distribution, Uniform};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consent banners, most specific first.
pub const CONSENT_SELECTORS: &[&str] = &[
    "[data-role=\"accept-consent\"]",
    "button[data-testid=\"consent-accept\"]",
    "#onetrust-accept-btn-handler",
    "#sp-cc-accept",
    "button[data-testid=\"accept-all\"]",
    "button[id*=\"accept\"]",
];

pub const CONSENT_PHRASES: &[&str] = &[
    "akceptuję",
    "zgadzam się",
    "zgoda",
    "accept all",
    "accept",
    "alle akzeptieren",
    "akzeptieren",
];

const CONSENT_CANDIDATES: &str = "button, [role=\"button\"], a[role=\"button\"], input[type=\"button\"], input[type=\"submit\"]";

/// Dismiss a consent dialog, stopping at the first thing that matches.
/// Returns the selector or phrase that was used.
pub async fn dismiss_consent(page: &dyn PageHandle) -> Option<String> {
    match page.first_present(CONSENT_SELECTORS).await {
        Ok(Some(sel)) => {
            if page.click(&sel).await.unwrap_or(false) {
                info!("🍪 consent dismissed via {}", sel);
                tokio::time::sleep(Duration::from_millis(600)).await;
                return Some(sel);
            }
        }
        Ok(None) => {}
        Err(e) => warn!("consent probe failed: {}", e),
    }

    match page.mark_by_text(CONSENT_CANDIDATES, CONSENT_PHRASES).await {
        Ok(Some(sel)) => {
            if page.click(&sel).await.unwrap_or(false) {
                info!("🍪 consent dismissed by phrase");
                tokio::time::sleep(Duration::from_millis(600)).await;
                return Some(sel);
            }
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("consent phrase probe failed: {}", e);
            None
        }
    }
}

/// Pause, wander the pointer, scroll down and partly back up.
pub async fn simulate_presence(page: &dyn PageHandle, pacing: &RequestDelay) {
    pacing.pause().await;

    let (moves, scroll): (Vec<(i32, i32, u64)>, i32) = {
        let mut rng = rand::rng();
        let (Ok(x_dist), Ok(y_dist), Ok(gap_dist), Ok(count_dist), Ok(scroll_dist)) = (
            Uniform::new(100, 800),
            Uniform::new(100, 600),
            Uniform::new(80u64, 260),
            Uniform::new(3usize, 6),
            Uniform::new(200, 800),
        ) else {
            return;
        };
        let n = count_dist.sample(&mut rng);
        let moves = (0..n)
            .map(|_| {
                (
                    x_dist.sample(&mut rng),
                    y_dist.sample(&mut rng),
                    gap_dist.sample(&mut rng),
                )
            })
            .collect();
        (moves, scroll_dist.sample(&mut rng))
    };

    debug!("pointer wander: {} moves, scroll {}px", moves.len(), scroll);
    for (x, y, gap) in moves {
        if let Err(e) = page.move_pointer(x, y).await {
            warn!("Mouse simulation error: {}", e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(gap)).await;
    }

    if let Err(e) = page.scroll_by(scroll).await {
        warn!("Scroll simulation error: {}", e);
        return;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    if let Err(e) = page.scroll_by(-(scroll / 2)).await {
        warn!("Scroll-up simulation error: {}", e);
    }
}
