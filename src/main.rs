//! Simulation driver
//!
//! Builds a small three-layer linear model, places its weights on NAND,
//! lowers it to a command stream, and runs the accelerator model once.

use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use nandsim::{
    Accelerator, MapperPass, NodeAnnotation, RuntimeContext, RuntimeError, SimConfig, lower_model,
};

fn main() {
    TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("logger init");

    if let Err(e) = run() {
        log::error!("simulation failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), RuntimeError> {
    let config = SimConfig::default();
    let mut accelerator = Accelerator::new(&config)?;
    let mut ctx = RuntimeContext::new();

    let mut nodes = vec![
        NodeAnnotation::linear("fc1", 1024, 4096),
        NodeAnnotation::row_parallel_linear("fc2", 4096, 1024),
        NodeAnnotation::linear("head", 256, 4096),
    ];

    MapperPass::run(accelerator.manager_mut(), &mut nodes)?;
    let program = lower_model(&nodes, &mut ctx)?;
    log::info!(
        "compiled {} nodes into {} prologue + {} commands",
        nodes.len(),
        program.prologue.len(),
        program.commands.len()
    );

    accelerator.load_program(program);
    let status = accelerator.run();

    let stats = accelerator.manager().stats();
    log::info!(
        "sim time {}, {} ops finished",
        status.sim_time,
        status.finished_ops
    );
    log::info!(
        "{} files, {} mapped pages, {} live windows, sram {}/{} pages free",
        stats.files,
        stats.mapped_pages,
        stats.resource_entries,
        stats.sram_free_pages,
        accelerator.manager().sram_free.total_pages()
    );
    if let Some(fault) = &status.fault {
        log::error!(
            "first fault: op {} ({}), waiting on {:?}",
            fault.op_id,
            fault.error,
            fault.predecessors
        );
    }
    Ok(())
}
