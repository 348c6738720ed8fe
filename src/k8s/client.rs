// Client creation with custom user-agent support for kube 2.x
use crate::error::Result;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Push a `user-agent` header onto `config`.
///
/// Invalid header values are logged and skipped so the default user-agent is kept.
pub fn add_user_agent_header(config: &mut Config, user_agent: &str) {
    match HeaderValue::from_str(user_agent) {
        Ok(value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), value)),
        Err(e) => warn!("Ignoring invalid user-agent {:?}: {}", user_agent, e),
    }
}

/// Build a client from an already resolved `Config`, tagging requests with `user_agent`
///
/// # Errors
///
/// Will return `Err` if the client cannot be built from the configuration
pub fn from_config(mut config: Config, user_agent: &str) -> Result<Client> {
    add_user_agent_header(&mut config, user_agent);
    Ok(Client::try_from(config)?)
}
