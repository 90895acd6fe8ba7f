use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use recall_core::View;
use recall_hw::{Camera, FrameSampler, SamplerConfig, V4lDevice};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "recall", about = "Recall memory helper CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Print what the display currently shows
    View,
    /// Follow the display as it changes
    Watch,
    /// Dismiss the shown person or error
    Dismiss,
    /// Turn the camera on (or retry after a camera error)
    Start,
    /// Turn the camera off
    Stop,
    /// Save the latest camera frame as a JPEG
    Snapshot {
        /// Output file
        path: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Where to write the captured frame
        #[arg(short, long, default_value = "recall-test.jpg")]
        output: PathBuf,
    },
}

#[zbus::proxy(
    interface = "org.memoryhelper.Recall1",
    default_service = "org.memoryhelper.Recall1",
    default_path = "/org/memoryhelper/Recall1"
)]
trait Recall {
    fn view(&self) -> zbus::Result<String>;
    fn dismiss(&self) -> zbus::Result<String>;
    fn start(&self) -> zbus::Result<String>;
    fn stop(&self) -> zbus::Result<String>;
    fn snapshot(&self) -> zbus::Result<Vec<u8>>;
    fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn view_changed(&self, view: &str) -> zbus::Result<()>;
}

/// Render a view received from the daemon as display text.
fn render(json: &str) -> Result<String> {
    let view: View = serde_json::from_str(json).context("daemon sent an unrecognized view")?;
    Ok(view.to_string())
}

async fn connect() -> Result<RecallProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    RecallProxy::new(&conn)
        .await
        .context("recalld is not reachable")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect().await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::View => {
            let proxy = connect().await?;
            println!("{}", render(&proxy.view().await?)?);
        }
        Commands::Watch => {
            let proxy = connect().await?;
            let mut changes = proxy.receive_view_changed().await?;
            println!("{}\n", render(&proxy.view().await?)?);
            while let Some(signal) = changes.next().await {
                let args = signal.args()?;
                println!("{}\n", render(args.view())?);
            }
        }
        Commands::Dismiss => {
            let proxy = connect().await?;
            println!("{}", render(&proxy.dismiss().await?)?);
        }
        Commands::Start => {
            let proxy = connect().await?;
            println!("{}", render(&proxy.start().await?)?);
        }
        Commands::Stop => {
            let proxy = connect().await?;
            println!("{}", render(&proxy.stop().await?)?);
        }
        Commands::Snapshot { path } => {
            let proxy = connect().await?;
            let jpeg = proxy.snapshot().await?;
            std::fs::write(&path, &jpeg)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Saved {} bytes to {}", jpeg.len(), path.display());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{} ({})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, output } => camera_test(device, output).await?,
    }

    Ok(())
}

/// Open the camera the way the daemon does, wait for it to settle, and save
/// the first usable frame.
async fn camera_test(device: String, output: PathBuf) -> Result<()> {
    println!("Opening {device}...");
    let mut sampler = FrameSampler::new(
        V4lDevice::new(device),
        SamplerConfig {
            jpeg_quality: 90,
            ..SamplerConfig::default()
        },
    );
    let preview = sampler.preview();
    let (tx, mut rx) = mpsc::channel(1);
    if let Err(e) = sampler.start(tx) {
        bail!("{}", e.user_message());
    }

    let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
    let brightness = preview.borrow().as_ref().map(|raw| raw.avg_brightness());
    sampler.stop();

    let frame = match frame {
        Ok(Some(frame)) => frame,
        Ok(None) => bail!("camera stopped delivering frames"),
        Err(_) => bail!("no usable frame within 10s (lens covered or too dark?)"),
    };

    std::fs::write(&output, &frame.data)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Captured {}x{} frame #{} ({} bytes) -> {}",
        frame.width,
        frame.height,
        frame.sequence,
        frame.data.len(),
        output.display()
    );
    if let Some(brightness) = brightness {
        println!("Average brightness: {brightness:.1}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_person() {
        let json = r#"{"kind":"person","profile":{"personId":"p1","name":"Sarah","relationship":"Daughter","photoUrl":null,"summary":"She visits on Sundays."}}"#;
        assert_eq!(render(json).unwrap(), "Sarah\nYour daughter\n\nShe visits on Sundays.");
    }

    #[test]
    fn test_render_scanning() {
        assert_eq!(
            render(r#"{"kind":"scanning","waiting":false}"#).unwrap(),
            "Looking for faces..."
        );
    }

    #[test]
    fn test_render_rejects_unknown_view() {
        assert!(render(r#"{"kind":"fireworks"}"#).is_err());
    }
}
