//! Kernel lowering
//!
//! Turns annotated compute-graph nodes into the macro-op program the
//! accelerator consumes. The front-end tracer itself lives outside this
//! crate; its whole contract is the `NodeAnnotation` struct. Lowering
//! separates address assignment from execution: every op carries the
//! logical addresses it will use, pre-allocated here, so the runtime never
//! picks addresses at execution time.

use crate::commands::{MacroCall, MacroOp, RuntimeContext};
use crate::config::{BYTES_PER_ELEMENT, PAGE_SIZE};
use crate::error::RuntimeError;
use crate::manager::RuntimeManager;

// ============================================================================
// Front-End Contract
// ============================================================================

/// Per-node metadata recorded by the front-end passes
#[derive(Debug, Clone)]
pub struct NodeAnnotation {
    pub name: String,
    pub module_type: String,
    /// Weight tensor shape, `[out_features, in_features]` for linear layers
    pub weight_shape: Vec<u32>,
    /// NAND pages needed to store the node's weights (0 = stateless node)
    pub nand_store_pages: u32,
    pub require_all_reduce: bool,
    /// Assigned by the mapper pass
    pub file_id: Option<u64>,
}

impl NodeAnnotation {
    pub fn linear(name: &str, out_features: u32, in_features: u32) -> Self {
        let weight_bytes = out_features as u64 * in_features as u64 * BYTES_PER_ELEMENT;
        Self {
            name: name.to_string(),
            module_type: "Linear".to_string(),
            weight_shape: vec![out_features, in_features],
            nand_store_pages: weight_bytes.div_ceil(PAGE_SIZE) as u32,
            require_all_reduce: false,
            file_id: None,
        }
    }

    pub fn row_parallel_linear(name: &str, out_features: u32, in_features: u32) -> Self {
        let mut node = Self::linear(name, out_features, in_features);
        node.module_type = "RowParallelLinear".to_string();
        node.require_all_reduce = true;
        node
    }
}

// ============================================================================
// Program
// ============================================================================

/// Compiled command stream
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// One-time setup ops (file mappings), executed before the clock starts
    pub prologue: Vec<MacroOp>,
    /// Per-invocation ops, in issue order
    pub commands: Vec<MacroOp>,
}

// ============================================================================
// Mapper Pass
// ============================================================================

/// Places each stateful node's weights on NAND
///
/// Runs before lowering and is the only writer of the file table. Nodes are
/// visited in graph order, so file ids are dense and follow that order.
pub struct MapperPass;

impl MapperPass {
    pub fn run(
        manager: &mut RuntimeManager,
        nodes: &mut [NodeAnnotation],
    ) -> Result<(), RuntimeError> {
        for node in nodes.iter_mut() {
            if node.nand_store_pages == 0 {
                continue;
            }
            let file_id = manager.create_new_file(node.nand_store_pages as u64)?;
            node.file_id = Some(file_id);
            log::debug!("mapper: node {} -> file {}", node.name, file_id);
        }
        Ok(())
    }
}

// ============================================================================
// Linear Kernel
// ============================================================================

/// Lowers linear-layer nodes into mmap / prefetch / compute / release
///
/// The mmap lands in the prologue buffer (weights are mapped once); the
/// prefetch, compute, and release repeat per invocation and go to the
/// command buffer.
pub struct LinearKernel {
    pub global_command_buffer: Vec<MacroOp>,
    pub command_buffer: Vec<MacroOp>,
}

impl LinearKernel {
    pub fn new() -> Self {
        Self {
            global_command_buffer: Vec::new(),
            command_buffer: Vec::new(),
        }
    }

    pub fn lower(
        &mut self,
        node: &NodeAnnotation,
        ctx: &mut RuntimeContext,
    ) -> Result<(), RuntimeError> {
        let file_id = node.file_id.ok_or(RuntimeError::UnknownFile)?;
        let num_pages = node.nand_store_pages;

        let mmap_ptr = ctx.addr_allocator.allocate()?;
        self.global_command_buffer.push(ctx.op(MacroCall::NandMmap {
            file_id,
            pre_alloc_logic_addr: mmap_ptr,
        }));

        let sram_ptr = ctx.addr_allocator.allocate()?;
        self.command_buffer.push(ctx.op(MacroCall::SramPrefetch {
            prefetch_addr: mmap_ptr,
            num_pages,
            pre_alloc_logic_addr: sram_ptr,
        }));

        self.command_buffer.push(ctx.op(MacroCall::MatMul {
            weight_pages: num_pages,
            weight_shape: node.weight_shape.clone(),
            sram_addr: sram_ptr,
        }));

        if node.require_all_reduce {
            // Single-xPU machine: the reduction collapses to a local no-op.
            log::debug!("node {}: all-reduce elided", node.name);
        }

        self.command_buffer
            .push(ctx.op(MacroCall::SramPrefetchRelease { addr: sram_ptr }));
        Ok(())
    }

    pub fn into_program(self) -> Program {
        Program {
            prologue: self.global_command_buffer,
            commands: self.command_buffer,
        }
    }
}

impl Default for LinearKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower a whole annotated graph into one program.
pub fn lower_model(
    nodes: &[NodeAnnotation],
    ctx: &mut RuntimeContext,
) -> Result<Program, RuntimeError> {
    let mut kernel = LinearKernel::new();
    for node in nodes {
        kernel.lower(node, ctx)?;
    }
    Ok(kernel.into_program())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn test_linear_annotation_page_count() {
        // 512 x 512 fp16 weights = 512KiB = 128 pages
        let node = NodeAnnotation::linear("fc1", 512, 512);
        assert_eq!(node.nand_store_pages, 128);
        assert_eq!(node.weight_shape, vec![512, 512]);
        assert!(node.file_id.is_none());

        // Sub-page weights still need one page
        let tiny = NodeAnnotation::linear("tiny", 4, 4);
        assert_eq!(tiny.nand_store_pages, 1);
    }

    #[test]
    fn test_mapper_assigns_dense_file_ids() {
        let mut manager = RuntimeManager::new(&SimConfig::default()).unwrap();
        let mut nodes = vec![
            NodeAnnotation::linear("fc1", 64, 64),
            NodeAnnotation::linear("fc2", 64, 64),
            NodeAnnotation::row_parallel_linear("fc3", 64, 64),
        ];
        MapperPass::run(&mut manager, &mut nodes).unwrap();
        assert_eq!(nodes[0].file_id, Some(1));
        assert_eq!(nodes[1].file_id, Some(2));
        assert_eq!(nodes[2].file_id, Some(3));
        assert_eq!(manager.file_table.count(), 3);
    }

    #[test]
    fn test_lowering_shape() {
        let mut ctx = RuntimeContext::new();
        let mut node = NodeAnnotation::linear("fc1", 64, 64);
        node.file_id = Some(1);

        let mut kernel = LinearKernel::new();
        kernel.lower(&node, &mut ctx).unwrap();
        let program = kernel.into_program();

        assert_eq!(program.prologue.len(), 1);
        assert_eq!(program.commands.len(), 3);

        let MacroCall::NandMmap {
            file_id,
            pre_alloc_logic_addr: mmap_ptr,
        } = program.prologue[0].call
        else {
            panic!("prologue should hold the mmap");
        };
        assert_eq!(file_id, 1);

        let MacroCall::SramPrefetch {
            prefetch_addr,
            num_pages,
            pre_alloc_logic_addr: sram_ptr,
        } = program.commands[0].call
        else {
            panic!("first command should be the prefetch");
        };
        assert_eq!(prefetch_addr, mmap_ptr);
        assert_eq!(num_pages, node.nand_store_pages);
        assert_ne!(sram_ptr, mmap_ptr);

        let MacroCall::MatMul { sram_addr, .. } = &program.commands[1].call else {
            panic!("second command should be the compute op");
        };
        assert_eq!(*sram_addr, sram_ptr);

        let MacroCall::SramPrefetchRelease { addr } = program.commands[2].call else {
            panic!("third command should release the prefetch");
        };
        assert_eq!(addr, sram_ptr);
    }

    #[test]
    fn test_lowering_ids_are_monotonic_across_nodes() {
        let mut ctx = RuntimeContext::new();
        let mut nodes = vec![
            NodeAnnotation::linear("fc1", 16, 16),
            NodeAnnotation::linear("fc2", 16, 16),
        ];
        nodes[0].file_id = Some(1);
        nodes[1].file_id = Some(2);

        let program = lower_model(&nodes, &mut ctx).unwrap();
        for buffer in [&program.prologue, &program.commands] {
            for pair in buffer.windows(2) {
                assert!(pair[0].id < pair[1].id, "issue order must follow ids");
            }
        }
        let mut ids: Vec<u64> = program
            .prologue
            .iter()
            .chain(program.commands.iter())
            .map(|op| op.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_lowering_without_mapper_fails() {
        let mut ctx = RuntimeContext::new();
        let node = NodeAnnotation::linear("fc1", 16, 16);
        let mut kernel = LinearKernel::new();
        assert_eq!(
            kernel.lower(&node, &mut ctx),
            Err(RuntimeError::UnknownFile)
        );
    }

    #[test]
    fn test_windows_disjoint_across_model() {
        let mut ctx = RuntimeContext::new();
        let mut nodes = vec![
            NodeAnnotation::linear("fc1", 128, 128),
            NodeAnnotation::linear("fc2", 128, 128),
        ];
        nodes[0].file_id = Some(1);
        nodes[1].file_id = Some(2);
        let program = lower_model(&nodes, &mut ctx).unwrap();

        let mut bases = Vec::new();
        for op in program.prologue.iter().chain(program.commands.iter()) {
            match op.call {
                MacroCall::NandMmap {
                    pre_alloc_logic_addr,
                    ..
                }
                | MacroCall::SramPrefetch {
                    pre_alloc_logic_addr,
                    ..
                } => bases.push(pre_alloc_logic_addr),
                _ => {}
            }
        }
        bases.sort_unstable();
        for pair in bases.windows(2) {
            assert!(pair[1] - pair[0] >= 1 << 30);
        }
    }
}
