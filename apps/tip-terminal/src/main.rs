#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

//! Terminal host for the tip widget: requests an invoice, shows it as text
//! and as a unicode QR code, rewrites a countdown line, and prints the
//! terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use console::Term;
use qrcode::render::unicode;
use tracing::warn;

use tip_widget::{
    ChannelConfig, HttpBackendConfig, HttpTipBackend, TipWidget, WidgetEvent, event_channel,
};

#[derive(Debug, Parser)]
#[command(name = "tip-terminal", about = "Request a Lightning tip invoice and wait for settlement")]
struct Args {
    /// Base URL of the tip backend, e.g. http://127.0.0.1:8081/
    #[arg(long)]
    backend: String,

    /// Tip amount in satoshis.
    #[arg(long)]
    amount: String,

    /// Message attached to the invoice.
    #[arg(long, default_value = "")]
    message: String,

    /// Poll cadence when the backend offers no push stream.
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let backend = Arc::new(HttpTipBackend::new(HttpBackendConfig::new(&args.backend))?);
    let (events, mut rx) = event_channel();
    let widget = TipWidget::with_config(
        backend,
        ChannelConfig {
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        },
        events,
    );

    widget.request_invoice(&args.amount, &args.message).await;

    let term = Term::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            WidgetEvent::InvoiceReady { invoice, code } => {
                term.write_line("Your tip request:")?;
                term.write_line("")?;
                term.write_line(&invoice.payload)?;
                term.write_line("")?;
                term.write_line(&format!("lightning:{}", invoice.payload))?;
                match code {
                    Ok(code) => {
                        let image = code
                            .code
                            .render::<unicode::Dense1x2>()
                            .quiet_zone(true)
                            .build();
                        term.write_line(&image)?;
                    }
                    Err(error) => {
                        warn!(%error, "showing the invoice as text only");
                    }
                }
            }
            WidgetEvent::CountdownTick { remaining_seconds } => {
                term.clear_line()?;
                term.write_str(&format!("Expires in {}", format_remaining(remaining_seconds)))?;
            }
            WidgetEvent::Expired => {
                term.write_line("")?;
                term.write_line("Your tip request expired!")?;
                break;
            }
            WidgetEvent::Settled { picture_url } => {
                term.write_line("")?;
                term.write_line("Thank you for your tip!")?;
                if let Some(url) = picture_url {
                    term.write_line(&url)?;
                }
                break;
            }
            WidgetEvent::Failed { error } => {
                term.write_line(&format!("Error: {error}"))?;
                return Err(error.into());
            }
        }
    }

    Ok(())
}

/// `H:MM:SS` when hours remain, `MM:SS` otherwise.
fn format_remaining(total_seconds: u64) -> String {
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = (total_seconds / 3600) % 24;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
