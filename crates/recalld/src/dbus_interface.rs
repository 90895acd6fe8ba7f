use crate::session::{SessionError, SessionHandle};
use recall_core::View;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.memoryhelper.Recall1";
pub const OBJECT_PATH: &str = "/org/memoryhelper/Recall1";

/// D-Bus interface for the Recall session daemon.
///
/// Bus name: org.memoryhelper.Recall1
/// Object path: /org/memoryhelper/Recall1
///
/// Views cross the bus as JSON (see [`View`]'s serde form) so display
/// clients can render them without linking this crate.
pub struct RecallService {
    pub session: SessionHandle,
    pub device: String,
    pub api_url: String,
}

fn view_json(view: &View) -> zbus::fdo::Result<String> {
    serde_json::to_string(view).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn session_failed(e: SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.memoryhelper.Recall1")]
impl RecallService {
    /// Current view as JSON.
    async fn view(&self) -> zbus::fdo::Result<String> {
        view_json(&self.session.view())
    }

    /// Dismiss the shown person or error banner. Returns the resulting view.
    async fn dismiss(&self) -> zbus::fdo::Result<String> {
        tracing::info!("dismiss requested");
        let view = self.session.dismiss().await.map_err(session_failed)?;
        view_json(&view)
    }

    /// Turn the camera on, or retry after a device error.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        let view = self.session.start().await.map_err(session_failed)?;
        view_json(&view)
    }

    /// Turn the camera off.
    async fn stop(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop requested");
        let view = self.session.stop().await.map_err(session_failed)?;
        view_json(&view)
    }

    /// Latest camera preview as JPEG bytes.
    async fn snapshot(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.session
            .snapshot()
            .await
            .map_err(session_failed)?
            .ok_or_else(|| zbus::fdo::Error::Failed("no camera frame available".into()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let view = self.session.view();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "active": !matches!(view, View::Off | View::DeviceError { .. }),
            "device": self.device,
            "api_url": self.api_url,
            "view": view,
        })
        .to_string())
    }

    /// Emitted whenever the view changes. Carries the view as JSON.
    #[zbus(signal)]
    pub async fn view_changed(emitter: &SignalEmitter<'_>, view: &str) -> zbus::Result<()>;
}
