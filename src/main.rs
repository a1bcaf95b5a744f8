use log::*;
use std::path::PathBuf;
use structopt::StructOpt;
use vssrail::decisions::DecisionTable;
use vssrail::error::{Error, Result};
use vssrail::extract::{extract_solution, ExtractionSettings};
use vssrail::instance::Instance;

#[derive(Debug, StructOpt)]
#[structopt(name = "vssrail", about = "Virtual subsection layout extraction.")]
struct Opt {
    /// Instance directory with network.json, timetable.json and routes/
    #[structopt(name = "INSTANCE")]
    #[structopt(parse(from_os_str))]
    instance: PathBuf,

    /// Optimizer decisions as JSON.
    #[structopt(short, long)]
    #[structopt(parse(from_os_str))]
    decisions: PathBuf,

    /// Time step of the discretization in seconds.
    #[structopt(long, default_value = "1")]
    dt: i64,

    /// Write the solution into this directory.
    #[structopt(short, long)]
    #[structopt(parse(from_os_str))]
    output: Option<PathBuf>,

    /// Drop VSS that no train uses as a boundary.
    #[structopt(long)]
    postprocess: bool,

    /// Routes were chosen by the optimizer and are rebuilt from its decisions.
    #[structopt(long)]
    free_routes: bool,

    /// Write the full instance next to the solution, not only the routes.
    #[structopt(long)]
    export_instance: bool,

    /// Activate debug mode
    #[structopt(short, long)]
    verbose: bool,
}

fn run(opt: &Opt) -> Result<()> {
    let instance = {
        let _h = hprof::enter("read instance");
        trace!("Loading instance {}", opt.instance.display());
        Instance::import_instance(&opt.instance)?
    };
    if !instance.check_consistency(!opt.free_routes) {
        return Err(Error::Inconsistency(format!(
            "instance {} is not consistent",
            opt.instance.display()
        )));
    }

    let decisions = {
        let _h = hprof::enter("read decisions");
        DecisionTable::load(&opt.decisions)?
    };

    let settings = ExtractionSettings {
        postprocess: opt.postprocess,
        fixed_routes: !opt.free_routes,
    };
    let solution = extract_solution(&decisions, &instance, opt.dt, settings)?;
    info!(
        "Solution {} with {} VSS (optimizer objective {})",
        solution.status(),
        solution.obj(),
        solution.mip_obj()
    );
    debug!("Solution:\n{}", solution.summary());

    if let Some(dir) = &opt.output {
        let _h = hprof::enter("export");
        solution.export_solution(dir, opt.export_instance)?;
        info!("Wrote solution to {}", dir.display());
    }
    Ok(())
}

fn main() {
    let _h1 = hprof::enter("init");

    let opt = Opt::from_args();
    let level = if opt.verbose {
        if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    } else {
        LevelFilter::Error
    };
    if let Err(e) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("Could not initialize logger: {}", e);
    }
    info!("{:#?}", opt);
    drop(_h1);

    let result = run(&opt);

    hprof::end_frame();
    hprof::profiler().print_timing();

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
