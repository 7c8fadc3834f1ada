//! Stream H.264 from a camera to stdout.
//!
//! ```text
//! cargo run --example pull_stream -- /dev/video0 > capture.h264
//! ```
//!
//! The raw byte stream plays back with e.g. `ffplay capture.h264`.

use std::io::Write;

use argus::prelude::*;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = CameraConfig::default();
    if let Some(device) = std::env::args().nth(1) {
        config.device = device;
    }

    let mut source = CameraByteSource::open(&config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut chunk = vec![0u8; 64 * 1024];

    info!(device = %config.device, "streaming; interrupt to stop");
    loop {
        source.request_next_frame()?;
        match source.service(&mut chunk) {
            Ok(Some(done)) => {
                out.write_all(&chunk[..done.bytes])?;
                if done.end_of_stream {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "stream failed");
                source.stop();
                return Err(err.into());
            }
        }
    }

    source.stop();
    Ok(())
}
