use crate::features::antibot::Identity;

/// Init script injected before any page script runs. Aligns navigator fields with the
/// identity the session was launched with and hides common automation tells.
pub fn init_script(identity: &Identity) -> String {
    let primary = identity.locale.clone();
    let short = primary.split('-').next().unwrap_or("en").to_string();
    let languages = serde_json::to_string(&[primary, short]).unwrap_or_else(|_| "[\"en-US\",\"en\"]".into());
    let platform = if identity.user_agent.contains("Windows") {
        "Win32"
    } else if identity.user_agent.contains("Macintosh") {
        "MacIntel"
    } else if identity.user_agent.contains("iPhone") {
        "iPhone"
    } else {
        "Linux x86_64"
    };
    let touch_points = if identity.mobile { 5 } else { 0 };

    format!(
        r#"
(() => {{
    const proto = Navigator.prototype;
    const define = (key, value) => {{
        try {{
            Object.defineProperty(proto, key, {{ get: () => value, configurable: true }});
        }} catch (e) {{}}
    }};
    define('webdriver', undefined);
    try {{ delete navigator.webdriver; }} catch (e) {{}}
    define('languages', {languages});
    define('platform', '{platform}');
    define('maxTouchPoints', {touch_points});
    define('plugins', [1, 2, 3, 4, 5]);
    define('hardwareConcurrency', 8);

    if (!window.chrome) {{ window.chrome = {{}}; }}
    if (!window.chrome.runtime) {{
        window.chrome.runtime = {{
            connect: function() {{ return {{ onDisconnect: {{ addListener: function() {{}} }} }}; }},
            sendMessage: function() {{}},
        }};
    }}

    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {{
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({{ state: Notification.permission }})
                : originalQuery(parameters)
        );
    }}

    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {{
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, arguments);
    }};

    delete window.__playwright;
    delete window.__puppeteer;
    delete window.__selenium;
    delete window.callPhantom;
    delete window._phantom;
}})();
"#
    )
}
