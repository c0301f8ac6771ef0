//! Scanner that replays recorded advertisements from a line stream.
//!
//! Each line is `NAME RSSI`, e.g. `B1_7 -71`. An RSSI of `null`, `-` or a
//! missing column is reported as an absent reading. Blank lines and lines
//! starting with `#` are skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::session::{Advertisement, BeaconScanner, ScanError};

// ---

pub struct LineScanner<R> {
    // ---
    reader: Option<R>,
    task: Option<JoinHandle<()>>,
}

impl<R> LineScanner<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            task: None,
        }
    }
}

impl<R> BeaconScanner for LineScanner<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn start(&mut self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<(), ScanError> {
        // ---
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| ScanError::Unavailable("no async runtime".into()))?;
        let reader = self
            .reader
            .take()
            .ok_or_else(|| ScanError::Unavailable("replay source already consumed".into()))?;

        self.task = Some(rt.spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(adv) = parse_line(&line) else { continue };
                        if sink.send(adv).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("replay source exhausted");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "replay source read failed");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn parse_line(line: &str) -> Option<Advertisement> {
    // ---
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut cols = line.split_whitespace();
    let name = cols.next()?.to_string();
    let rssi = match cols.next() {
        None | Some("null") | Some("-") => None,
        Some(raw) => raw.parse::<f64>().ok(),
    };
    Some(Advertisement { name, rssi })
}
