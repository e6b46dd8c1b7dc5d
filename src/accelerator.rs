//! Accelerator model
//!
//! Consumes a compiled program and schedules it on the simulation clock.
//! Commands are wrapped into hardware ops, chained so each op depends on
//! the one issued before it, and split across two queues: prefetches go to
//! the prefetch engine (which turns them into page-level micro-ops for the
//! NAND controller), everything else to the compute engine. An op is
//! dispatched once every input has notified its finish event; its handler
//! runs against the runtime tables at dispatch, and its own event is
//! notified at completion time.
//!
//! A failed op keeps its finish event un-notified, which blocks every
//! downstream op: the machine stalls there deliberately and reports the
//! fault in the post-run status.

use crate::addr::{NandAddress, NandGeometry};
use crate::commands::{MacroCall, MacroOp, MicroOp, OpId};
use crate::config::{BYTES_PER_ELEMENT, RUNTIME_CALL_NS, SimConfig};
use crate::entries::ResourceEntry;
use crate::error::RuntimeError;
use crate::kernels::Program;
use crate::manager::RuntimeManager;
use crate::nand_ctrl::NandController;
use crate::pagetable::{DeviceType, Permission};
use crate::sim::{FinishEvent, SimTime};

/// How many predecessor op ids a fault report carries at most
const FAULT_CHAIN_LEN: usize = 8;

// ============================================================================
// Hardware Ops
// ============================================================================

/// A macro-op wrapped for scheduling
#[derive(Debug)]
pub struct HwOp {
    pub op: MacroOp,
    pub finished: bool,
    pub finish_event: FinishEvent,
    /// Indices of the ops this one waits on (the previous op in issue order)
    pub input_ops: Vec<usize>,
}

// ============================================================================
// Run Status
// ============================================================================

/// First failure of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub op_id: OpId,
    pub error: RuntimeError,
    /// Ids of the ops the failed op was waiting on, nearest first
    pub predecessors: Vec<OpId>,
}

/// Post-run report
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub sim_time: SimTime,
    pub finished_ops: usize,
    pub fault: Option<Fault>,
}

impl RunStatus {
    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }
}

// ============================================================================
// Engines
// ============================================================================

/// Stages NAND-resident pages into SRAM via the NAND controller
struct PrefetchEngine {
    busy_until: SimTime,
}

/// Runs compute ops under a roofline cost and issues runtime calls
struct ComputeEngine {
    busy_until: SimTime,
}

// ============================================================================
// Accelerator
// ============================================================================

pub struct Accelerator {
    config: SimConfig,
    geom: NandGeometry,
    manager: RuntimeManager,
    nand_ctrl: NandController,
    prefetch_engine: PrefetchEngine,
    compute_engine: ComputeEngine,
    prologue: Vec<MacroOp>,
    ops: Vec<HwOp>,
    /// Arena indices of prefetch ops, in issue order
    prefetch_queue: Vec<usize>,
    /// Arena indices of every other op, in issue order
    normal_queue: Vec<usize>,
    clock: SimTime,
}

impl Accelerator {
    pub fn new(config: &SimConfig) -> Result<Self, RuntimeError> {
        let manager = RuntimeManager::new(config)?;
        let geom = manager.geometry();
        Ok(Self {
            config: *config,
            geom,
            manager,
            nand_ctrl: NandController::new(&config.nand)?,
            prefetch_engine: PrefetchEngine {
                busy_until: SimTime::ZERO,
            },
            compute_engine: ComputeEngine {
                busy_until: SimTime::ZERO,
            },
            prologue: Vec::new(),
            ops: Vec::new(),
            prefetch_queue: Vec::new(),
            normal_queue: Vec::new(),
            clock: SimTime::ZERO,
        })
    }

    pub fn manager(&self) -> &RuntimeManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut RuntimeManager {
        &mut self.manager
    }

    pub fn ops(&self) -> &[HwOp] {
        &self.ops
    }

    pub fn clock(&self) -> SimTime {
        self.clock
    }

    /// (prefetch queue, normal queue) lengths of the loaded program
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.prefetch_queue.len(), self.normal_queue.len())
    }

    /// Build the command queues from a program.
    ///
    /// Every op takes the previously issued op (across both queues) as its
    /// single input, so cross-queue ordering follows issue order.
    pub fn load_commands(&mut self, prologue: Vec<MacroOp>, commands: Vec<MacroOp>) {
        self.prologue = prologue;
        self.ops = Vec::with_capacity(commands.len());
        self.prefetch_queue.clear();
        self.normal_queue.clear();
        self.prefetch_engine.busy_until = SimTime::ZERO;
        self.compute_engine.busy_until = SimTime::ZERO;
        self.clock = SimTime::ZERO;

        for (index, op) in commands.into_iter().enumerate() {
            let input_ops = if index == 0 { Vec::new() } else { vec![index - 1] };
            if op.call.is_prefetch() {
                self.prefetch_queue.push(index);
            } else {
                self.normal_queue.push(index);
            }
            self.ops.push(HwOp {
                op,
                finished: false,
                finish_event: FinishEvent::new(),
                input_ops,
            });
        }
        log::debug!(
            "loaded {} prologue + {} queued ops ({} prefetch, {} normal)",
            self.prologue.len(),
            self.ops.len(),
            self.prefetch_queue.len(),
            self.normal_queue.len()
        );
    }

    pub fn load_program(&mut self, program: Program) {
        self.load_commands(program.prologue, program.commands);
    }

    /// Execute the loaded program to completion or to the first fault.
    pub fn run(&mut self) -> RunStatus {
        // Prologue: one-time setup, before the clock starts
        for op in &self.prologue {
            if let Err(error) = self.manager.handle(op) {
                log::error!("prologue op {} failed: {error}", op.id);
                return RunStatus {
                    sim_time: self.clock,
                    finished_ops: 0,
                    fault: Some(Fault {
                        op_id: op.id,
                        error,
                        predecessors: Vec::new(),
                    }),
                };
            }
        }

        let mut fault = None;
        let mut prefetch_head = 0;
        let mut normal_head = 0;
        loop {
            // Of the two queue heads, dispatch the eligible one that was
            // issued first. With the head-to-tail dependency chain at most
            // one head is ever eligible, but the rule stays correct for
            // sparser chains.
            let heads = [
                self.prefetch_queue.get(prefetch_head).copied(),
                self.normal_queue.get(normal_head).copied(),
            ];
            let mut next: Option<(usize, SimTime)> = None;
            for head in heads.into_iter().flatten() {
                if let Some(ready) = self.inputs_ready(head) {
                    match next {
                        Some((chosen, _)) if chosen < head => {}
                        _ => next = Some((head, ready)),
                    }
                }
            }
            let Some((index, ready)) = next else {
                break;
            };

            match self.dispatch(index, ready) {
                Ok(done) => {
                    let hw = &mut self.ops[index];
                    hw.finished = true;
                    hw.finish_event.notify(done);
                    self.clock = self.clock.max(done);
                }
                Err(error) => {
                    fault = Some(Fault {
                        op_id: self.ops[index].op.id,
                        error,
                        predecessors: self.predecessor_chain(index),
                    });
                    break;
                }
            }

            if Some(index) == self.prefetch_queue.get(prefetch_head).copied() {
                prefetch_head += 1;
            } else {
                normal_head += 1;
            }
        }

        let finished_ops = self.ops.iter().filter(|hw| hw.finished).count();
        match &fault {
            None => log::info!("run complete: {} ops in {}", finished_ops, self.clock),
            Some(f) => log::error!(
                "run stalled at op {} ({}): {} ops finished",
                f.op_id,
                f.error,
                finished_ops
            ),
        }
        RunStatus {
            sim_time: self.clock,
            finished_ops,
            fault,
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Latest finish time of the op's inputs; `None` while any input is
    /// still unfinished (including permanently, after an upstream fault).
    fn inputs_ready(&self, index: usize) -> Option<SimTime> {
        let mut ready = SimTime::ZERO;
        for &input in &self.ops[index].input_ops {
            let hw = &self.ops[input];
            if !hw.finished {
                return None;
            }
            ready = ready.max(hw.finish_event.time()?);
        }
        Some(ready)
    }

    fn dispatch(&mut self, index: usize, ready: SimTime) -> Result<SimTime, RuntimeError> {
        let op = self.ops[index].op.clone();
        match &op.call {
            MacroCall::SramPrefetch {
                pre_alloc_logic_addr,
                num_pages,
                ..
            } => self.dispatch_prefetch(&op, *pre_alloc_logic_addr, *num_pages as u64, ready),
            MacroCall::MatMul {
                weight_pages,
                weight_shape,
                sram_addr,
            } => self.dispatch_compute(*weight_pages as u64, weight_shape, *sram_addr, ready),
            _ => {
                // Plain runtime call on the compute engine
                let start = ready.max(self.compute_engine.busy_until);
                self.manager.handle(&op)?;
                let done = start + RUNTIME_CALL_NS;
                self.compute_engine.busy_until = done;
                Ok(done)
            }
        }
    }

    fn dispatch_prefetch(
        &mut self,
        op: &MacroOp,
        base: u64,
        num_pages: u64,
        ready: SimTime,
    ) -> Result<SimTime, RuntimeError> {
        self.manager.handle(op)?;
        let start = ready.max(self.prefetch_engine.busy_until);

        // Lower the new window into page-level micro-ops: one read per
        // source page, one SRAM write per staged page.
        let mut pairs: Vec<(u64, u64)> = match self.manager.resources.get(base) {
            Some(ResourceEntry::Prefetch(entry)) => entry
                .source_pages
                .iter()
                .map(|(&dst, &src)| (dst, src))
                .collect(),
            _ => return Err(RuntimeError::BadHandle),
        };
        pairs.sort_unstable();

        let mut nand_reads = Vec::new();
        let mut sram_writes = Vec::new();
        let mut ram_read_ns = 0u64;
        for &(prefetch_page, source_page) in &pairs {
            match self.manager.page_table.translate(source_page) {
                Some((DeviceType::Nand, physical_page)) => {
                    let addr = NandAddress::new(physical_page, self.geom)?;
                    nand_reads.push(MicroOp::NandPageRead(addr));
                }
                Some((DeviceType::Dram, _)) => ram_read_ns += self.config.dram.t_access_ns,
                Some((DeviceType::Sram, _)) => ram_read_ns += self.config.sram.t_access_ns,
                None => {}
            }
            if let Some((DeviceType::Sram, sram_page)) = self.manager.page_table.translate(prefetch_page)
            {
                sram_writes.push(MicroOp::SramPageWrite(sram_page));
            }
        }

        let reads_done = self.nand_ctrl.execute(start, &nand_reads) + ram_read_ns;
        let done = reads_done + sram_writes.len() as u64 * self.config.sram.t_access_ns;
        self.prefetch_engine.busy_until = done;
        log::debug!(
            "op {}: staged {} pages ({} NAND reads) by {}",
            op.id,
            num_pages,
            nand_reads.len(),
            done
        );
        Ok(done)
    }

    fn dispatch_compute(
        &mut self,
        weight_pages: u64,
        weight_shape: &[u32],
        sram_addr: u64,
        ready: SimTime,
    ) -> Result<SimTime, RuntimeError> {
        // The engine reads weights through the SRAM alias; the pages must
        // resolve and be readable.
        let start_page = sram_addr / self.manager.page_size();
        for i in 0..weight_pages {
            if !self
                .manager
                .page_table
                .check_permission(start_page + i, Permission::READ)
            {
                return Err(RuntimeError::PermDenied);
            }
        }

        // Roofline: the op takes whichever is longer of arithmetic and
        // weight traffic.
        let elements: u64 = weight_shape.iter().map(|&d| d as u64).product();
        let compute_ns = (2 * elements).div_ceil(self.config.xpu.flops_per_ns);
        let memory_ns = (elements * BYTES_PER_ELEMENT).div_ceil(self.config.xpu.sram_bytes_per_ns);
        let duration = compute_ns.max(memory_ns).max(1);

        let start = ready.max(self.compute_engine.busy_until);
        let done = start + duration;
        self.compute_engine.busy_until = done;
        Ok(done)
    }

    fn predecessor_chain(&self, index: usize) -> Vec<OpId> {
        let mut chain = Vec::new();
        let mut cursor = self.ops[index].input_ops.first().copied();
        while let Some(input) = cursor {
            if chain.len() == FAULT_CHAIN_LEN {
                break;
            }
            chain.push(self.ops[input].op.id);
            cursor = self.ops[input].input_ops.first().copied();
        }
        chain
    }
}
