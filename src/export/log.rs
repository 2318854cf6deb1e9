use super::{ExportItem, ExportSink};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};

/// Writes a one-line summary of every item to the log
pub struct LogSink {
    logger: StructuredLogger,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            logger: get_logger("export.log"),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ExportSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn export(&mut self, item: &ExportItem) -> Result<()> {
        match item {
            ExportItem::Snapshot(s) => self.logger.debug(&format!(
                "{} at {}: net {:+.3} kW (in {:.3} / out {:.3}){}",
                s.meter_id,
                s.measured_at().to_rfc3339(),
                s.net_power_kw,
                s.consumption_kw,
                s.injection_kw,
                s.gas
                    .as_ref()
                    .and_then(|g| g.volume_m3)
                    .map(|v| format!(", gas {:.3} m3", v))
                    .unwrap_or_default()
            )),
            ExportItem::Decision(d) => self.logger.info(&format!(
                "Decision {}: {} -> {} ({}{})",
                d.id,
                d.load,
                d.target,
                d.reason,
                d.average_surplus_kw
                    .map(|v| format!(", average surplus {:.3} kW", v))
                    .unwrap_or_default()
            )),
        }
        Ok(())
    }
}
