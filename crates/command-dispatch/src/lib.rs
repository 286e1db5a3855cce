//! Command dispatch: executes parsed voice intents against the dashboard
//! data API and words the outcome for speech.

pub mod api;
pub mod dispatcher;
pub mod error;

pub use api::{DataApi, HttpDataApi, DEFAULT_BASE_URL};
pub use dispatcher::{CommandDispatcher, CommandResult, UNREACHABLE_MESSAGE, UNSUPPORTED_MESSAGE};
pub use error::{ApiError, Result};

/// Initialize the command dispatch system
pub fn init() -> Result<()> {
    tracing::info!("Initializing command dispatch");
    Ok(())
}

/// Dispatcher talking to the data API at `base_url`
pub fn connect(base_url: &str) -> Result<CommandDispatcher> {
    let api = HttpDataApi::new(base_url)?;
    tracing::info!(url = api.base_url(), "Data API client ready");
    Ok(CommandDispatcher::new(Box::new(api)))
}
