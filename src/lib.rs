//! nandsim — event-driven simulator for a NAND-flash-backed ML accelerator
//!
//! The machine stores model weights on NAND flash, stages them through SRAM
//! (with DRAM as scratch), and feeds an xPU compute engine. The interesting
//! part is the runtime memory subsystem: a virtual page space layered over
//! the three physical memories, explicit mmap/malloc/prefetch commands
//! issued by the compiler front-end, and a cooperative event-driven
//! hardware model that executes the compiled command stream.
//!
//! Rough layering, bottom up:
//! - `addr`: mixed-radix NAND address geometry
//! - `free_table`, `file_table`, `pagetable`, `entries`: the runtime tables
//! - `manager`: the command interpreter mutating those tables
//! - `nand_ctrl`, `accelerator`: the timed hardware model
//! - `kernels`: lowering from annotated graph nodes to command streams

pub mod accelerator;
pub mod addr;
pub mod commands;
pub mod config;
pub mod entries;
pub mod error;
pub mod file_table;
pub mod free_table;
pub mod kernels;
pub mod manager;
pub mod nand_ctrl;
pub mod pagetable;
pub mod sim;

#[cfg(test)]
mod runtime_tests;

pub use accelerator::{Accelerator, RunStatus};
pub use commands::{MacroCall, MacroOp, RuntimeContext};
pub use config::SimConfig;
pub use error::RuntimeError;
pub use kernels::{LinearKernel, MapperPass, NodeAnnotation, Program, lower_model};
pub use manager::RuntimeManager;
