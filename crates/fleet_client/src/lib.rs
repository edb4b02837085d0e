pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod stream;

pub use api::{ClientBuilder, FleetClient, RegionResponse};
pub use auth::{
    CaptchaSolver, Credentials, Device, DeviceSelector, MfaPrompt, PromptingSelector, Token,
    TokenSource,
};
pub use config::{Config, OAuthConfig, StreamConfig, FLEET_AUDIENCE_EU, FLEET_AUDIENCE_NA};
pub use error::{Error, ErrorCategory, Result, TransportError};
pub use stream::{Frame, StreamSession};
