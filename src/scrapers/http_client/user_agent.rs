//! User agent handling for HTTP requests.

pub const DEFAULT_USER_AGENT: &str = "bulletin-monitor/0.2";

/// Resolve the user agent from configuration; blank means the default.
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") => DEFAULT_USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

/// Product token used to select robots.txt groups (`bulletin-monitor`).
pub fn robots_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or(user_agent)
        .to_lowercase()
}
