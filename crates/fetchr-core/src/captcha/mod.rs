//! Captcha decoders. Only the CSS-position family is supported.

mod css_position;

pub use css_position::{decode, parse_nodes, CaptchaNode, MalformedCaptchaError};
