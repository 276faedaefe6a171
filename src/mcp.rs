use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use eoka_pilot::{CdpDriver, Driver, Pilot, PilotConfig, ACTION_NAMES};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NavigateRequest {
    #[schemars(description = "URL to navigate to")]
    pub url: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ActRequest {
    #[schemars(
        description = "Action name: click, type, hover, right_click, focus, clear, select, checkbox, radio, slider, datepicker, colorpicker, drag_and_drop, upload_file, submit, get_value, fill_form, scroll, scroll_element, press_key, find_element, scan"
    )]
    pub action: String,
    #[schemars(
        description = "Action payload. Targets are an element index from snap or a selector (frame >> shadow-root >> el). Multi-part payloads use '|', e.g. '3|hello|ENTER' for type or '5|Canada' for select."
    )]
    #[serde(default)]
    pub payload: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

fn no_page() -> ErrorData {
    ErrorData::internal_error("No page open. Use navigate first.", None::<Value>)
}

#[derive(Clone)]
pub struct PilotServer {
    pilot: Arc<Mutex<Option<Pilot<CdpDriver>>>>,
    config: Arc<PilotConfig>,
    tool_router: ToolRouter<Self>,
}

impl PilotServer {
    async fn ensure_pilot(&self) -> Result<(), ErrorData> {
        let mut guard = self.pilot.lock().await;
        if guard.is_none() {
            let driver = CdpDriver::launch(&self.config.browser).await.map_err(err)?;
            *guard = Some(Pilot::new(driver, &self.config));
        }
        Ok(())
    }
}

#[tool_router]
impl PilotServer {
    pub fn new(config: PilotConfig) -> Self {
        Self {
            pilot: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Navigate to a URL. Launches browser on first call.")]
    async fn navigate(
        &self,
        req: Parameters<NavigateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.ensure_pilot().await?;
        let mut guard = self.pilot.lock().await;
        let pilot = guard.as_mut().ok_or_else(no_page)?;
        pilot.driver().goto(&req.0.url).await.map_err(err)?;
        let url = pilot.driver().url().await.map_err(err)?;
        let title = pilot.driver().title().await.map_err(err)?;
        text_ok(format!("Navigated to: {}\nTitle: {}", url, title))
    }

    #[tool(
        description = "Scan the page for interactive elements and return an annotated screenshot with numbered labels plus the element list. Indices refer to this scan; run it again after the page changes."
    )]
    async fn snap(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.pilot.lock().await;
        let pilot = guard.as_mut().ok_or_else(no_page)?;
        let marks = pilot.scan().await.map_err(err)?.clone();
        let b64 = pilot
            .driver()
            .annotated_screenshot_b64(&marks)
            .await
            .map_err(err)?;
        let list = if marks.is_empty() {
            "No interactive elements found.".to_string()
        } else {
            format!(
                "Found {} interactive elements:\n{}",
                marks.len(),
                marks.element_list()
            )
        };
        Ok(CallToolResult::success(vec![
            Content::image(b64, "image/png"),
            Content::text(list),
        ]))
    }

    #[tool(
        description = "Perform an action on the page. Returns a result line describing what happened and what changed, or a line starting with 'Error:'."
    )]
    async fn act(&self, req: Parameters<ActRequest>) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.pilot.lock().await;
        let pilot = guard.as_mut().ok_or_else(no_page)?;
        let outcome = pilot.dispatch(&req.0.action, &req.0.payload).await;
        if !outcome.is_handled() {
            return Err(ErrorData::invalid_params(
                format!(
                    "unknown action '{}', expected one of: {}",
                    req.0.action,
                    ACTION_NAMES.join(", ")
                ),
                None::<Value>,
            ));
        }
        text_ok(outcome.to_string())
    }

    #[tool(description = "Get the current page URL and title.")]
    async fn page_info(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.pilot.lock().await;
        let pilot = guard.as_mut().ok_or_else(no_page)?;
        let url = pilot.driver().url().await.map_err(err)?;
        let title = pilot.driver().title().await.map_err(err)?;
        text_ok(format!(
            "URL: {}\nTitle: {}\nMarked elements: {}",
            url,
            title,
            pilot.marks().len()
        ))
    }

    #[tool(description = "Close the browser and release resources.")]
    async fn close(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.pilot.lock().await;
        if let Some(pilot) = guard.take() {
            pilot.into_driver().close().await.map_err(err)?;
        }
        text_ok("Browser closed.")
    }
}

#[tool_handler]
impl ServerHandler for PilotServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "eoka-pilot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Vision-driven browser control. Use 'navigate' to open a URL (launches browser automatically), \
                 'snap' for an annotated screenshot with numbered elements, then 'act' with an action name \
                 and payload such as click '4' or type '2|search terms|ENTER'. Each action reports the \
                 strategy that worked and any observed page change. Re-run 'snap' when told the map is stale."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(config: PilotConfig) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    info!("Serving MCP over stdio");
    let server = PilotServer::new(config);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
