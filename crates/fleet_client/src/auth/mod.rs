//! Fleet API Authentication Module
//!
//! Authorization Code + PKCE flow:
//! 1. Generate a PKCE pair and state (`pkce`)
//! 2. Log in, answering MFA and captcha challenges through injected
//!    capabilities (`negotiator`, `mfa`)
//! 3. Exchange the code for a token and keep it refreshed (`token`)

mod form;
pub mod mfa;
pub mod negotiator;
pub mod pkce;
pub mod token;

pub use mfa::{
    validate_passcode, CaptchaSolver, Device, DeviceSelector, MfaPrompt, MfaUnsupported,
    PromptingSelector, MFA_PASSCODE_LENGTH,
};
pub use negotiator::{AuthorizationGrant, Credentials, LoginNegotiator};
pub use pkce::Pkce;
pub use token::{RefreshingTokenSource, StaticTokenSource, Token, TokenExchanger, TokenSource};
