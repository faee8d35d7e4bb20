//! Browser fetch response types.

/// Document as it looked after scripts ran.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub html: String,
}
