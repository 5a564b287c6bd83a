pub mod antibot;
pub mod captcha;
