use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};
use std::sync::Arc;
use tera::{Context, Tera};

use crate::web::{AppError, AppState};

const INSTALL_TEMPLATE: &str = include_str!("../../../templates/install-agent.sh.tera");

pub fn render_install_script(public_url: &str, download_url: &str) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("public_url", public_url);
    context.insert("download_url", download_url);
    Tera::one_off(INSTALL_TEMPLATE, &context, false)
}

/// Serves the one-shot installer. The enrollment token is supplied by the
/// operator when running it and is never embedded in the script.
pub async fn install_script_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let script = render_install_script(
        &app_state.config.public_url,
        &app_state.config.agent_download_url(),
    )?;
    Ok(([(header::CONTENT_TYPE, "text/x-shellscript; charset=utf-8")], script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_points_at_configured_urls() {
        let script = render_install_script(
            "https://fleet.example.com",
            "https://fleet.example.com/downloads/fleetwatch-agent",
        )
        .unwrap();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains(r#"server_url = \"https://fleet.example.com\""#));
        assert!(script.contains("https://fleet.example.com/downloads/fleetwatch-agent"));
        assert!(script.contains("Restart=on-failure"));
    }

    #[test]
    fn unit_runs_from_install_dir() {
        let script = render_install_script("http://localhost:8080", "http://localhost:8080/agent")
            .unwrap();
        // The agent's relative log dir resolves against this.
        assert!(script.contains("WorkingDirectory=$INSTALL_DIR"));
        assert!(script.contains("INSTALL_DIR=/opt/fleetwatch"));
    }
}
