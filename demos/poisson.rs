use std::f64::consts::PI;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use log::{info, LevelFilter};
use serde::Serialize;
use simple_logger::SimpleLogger;
use tilegrid::box_array::BoxArray;
use tilegrid::config::{self, Inputs};
use tilegrid::context::Context;
use tilegrid::distribution_map::DistributionMap;
use tilegrid::index_space::ibox;
use tilegrid::linop::{BcMode, LinOp};
use tilegrid::message::{LocalCommunicator, TcpCommunicator};
use tilegrid::multigrid::Multigrid;
use tilegrid::poisson::PoissonOp;
use tilegrid::{Error, Result};




/**
 * Solve -(u_xx + u_yy) = 2 pi^2 sin(pi x) sin(pi y) on the unit square with
 * u = 0 on the boundary, and compare with the exact solution. Run one
 * process per entry of --peers to solve over TCP; with no peers the solve
 * runs in this process alone.
 */
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// TOML inputs file with [fabarray] and [mg] tables
    #[clap(short, long)]
    inputs: Option<PathBuf>,

    /// Overrides of the form section.key=value
    #[clap(short = 's', long = "set")]
    overrides: Vec<String>,

    #[clap(short = 'n', long, default_value = "128")]
    num_cells: i64,

    #[clap(short = 'm', long, default_value = "32")]
    max_tile_size: usize,

    #[clap(short, long, default_value = "0")]
    rank: usize,

    /// Addresses of every rank, in rank order
    #[clap(short, long, use_value_delimiter = true)]
    peers: Vec<SocketAddr>,

    #[clap(short, long, default_value = "info")]
    log_level: LevelFilter,

    #[clap(short, long, default_value = "solution")]
    output: String,
}




#[derive(Serialize)]
struct Tile {
    lo: [i64; 2],
    hi: [i64; 2],
    data: Vec<f64>,
}




#[derive(Serialize)]
struct Solution {
    rank: usize,
    num_cells: i64,
    iterations: usize,
    tiles: Vec<Tile>,
}




// ============================================================================
fn run(opts: Opts, context: Arc<Context<2>>) -> Result<()> {
    let n = opts.num_cells;
    let h = 1.0 / n as f64;
    let domain = ibox([0, 0], [n - 1, n - 1]);
    let ba = BoxArray::decompose(domain, opts.max_tile_size);
    let dm = DistributionMap::knapsack(&ba, context.size());
    let mut op = PoissonOp::new(context.clone(), ba, dm, domain, [h, h]);

    let mut phi = op.make_array(0);
    let mut rhs = op.make_array(0);
    let x = move |i: i64| (i as f64 + 0.5) * h;
    rhs.set_from_function(|[i, j]| 2.0 * PI * PI * (PI * x(i)).sin() * (PI * x(j)).sin());

    let start = std::time::Instant::now();
    let mut mg = Multigrid::with_global_config(&mut op);
    let report = mg.solve(&mut phi, &rhs, 1e-10, 0.0, BcMode::Inhomogeneous)?;

    info!("{} levels, {:?} after {} iterations in {:.3}s", mg.num_levels(), report.status, report.iterations, start.elapsed().as_secs_f64());

    let mut error: f64 = 0.0;

    for (_, p) in phi.patches() {
        for [i, j] in p.valid().iter() {
            error = error.max((p[[i, j]] - (PI * x(i)).sin() * (PI * x(j)).sin()).abs());
        }
    }
    let error = context.mailbox().all_reduce_max_f64(error)?;

    if context.rank() == 0 {
        info!("max error {:e} at h = {:e}", error, h);
    }

    let solution = Solution {
        rank: context.rank(),
        num_cells: n,
        iterations: report.iterations,
        tiles: phi
            .patches()
            .map(|(_, p)| Tile {
                lo: p.valid().lo(),
                hi: p.valid().hi(),
                data: p.pack(&p.valid()),
            })
            .collect(),
    };

    let file = std::fs::File::create(format!("{}.{:04}.cbor", opts.output, context.rank()))?;
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&solution, &mut buffer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    context.finalize()
}




// ============================================================================
fn main() -> Result<()> {
    let opts = Opts::parse();

    SimpleLogger::new()
        .with_level(opts.log_level)
        .init()
        .map_err(|e| Error::Config(e.to_string()))?;

    let inputs = match &opts.inputs {
        Some(path) => Inputs::from_file(path, &opts.overrides)?,
        None => Inputs::from_str_with_overrides("", &opts.overrides)?,
    };
    config::initialize(inputs);

    let context = if opts.peers.is_empty() {
        Context::with_global_config(LocalCommunicator::serial())
    } else {
        Context::with_global_config(TcpCommunicator::new(opts.rank, opts.peers.clone())?)
    };
    run(opts, context)
}
