//! NAND controller timing model
//!
//! The controller services page reads, page programs, and block erases.
//! Channels operate independently and in parallel; within one channel,
//! commands serialize in arrival order. Plane-level parallelism is not
//! modeled: a channel is busy for the full duration of each command.

use crate::addr::NandGeometry;
use crate::commands::MicroOp;
use crate::config::NandConfig;
use crate::error::RuntimeError;
use crate::sim::SimTime;

pub struct NandController {
    config: NandConfig,
    channel_busy: Vec<SimTime>,
}

impl NandController {
    pub fn new(config: &NandConfig) -> Result<Self, RuntimeError> {
        let geom = NandGeometry::from_config(config)?;
        Ok(Self {
            config: *config,
            channel_busy: vec![SimTime::ZERO; geom.channels as usize],
        })
    }

    /// Execute a batch of NAND micro-ops issued at `now`.
    ///
    /// Each op is queued on its target channel behind whatever that channel
    /// is already doing. Returns the completion time of the whole batch
    /// (`now` for an empty batch). Non-NAND micro-ops are not this
    /// controller's business and are skipped.
    pub fn execute(&mut self, now: SimTime, ops: &[MicroOp]) -> SimTime {
        let mut batch_done = now;
        for op in ops {
            let (channel, cost) = match op {
                MicroOp::NandPageRead(addr) => (addr.channel(), self.config.t_read_ns),
                MicroOp::NandPageWrite(addr) => (addr.channel(), self.config.t_write_ns),
                MicroOp::NandBlockErase(block) => (block.channel(), self.config.t_erase_ns),
                _ => continue,
            };
            let done = self.schedule(now, channel as usize, cost);
            batch_done = batch_done.max(done);
        }
        batch_done
    }

    fn schedule(&mut self, now: SimTime, channel: usize, cost: u64) -> SimTime {
        let start = now.max(self.channel_busy[channel]);
        let done = start + cost;
        self.channel_busy[channel] = done;
        done
    }

    /// Time at which `channel` finishes its queued work
    pub fn channel_busy_until(&self, channel: usize) -> SimTime {
        self.channel_busy[channel]
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
