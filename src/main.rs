use std::process;

use anyhow::{bail, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use ccbench::affinity::{set_cpu, SystemInfo};
use ccbench::config::{
    parse_size, pow2roundup, DEFAULT_CORE1, DEFAULT_CORE2, DEFAULT_CORE3, DEFAULT_CORE_OTHERS,
    DEFAULT_CORES, DEFAULT_FENCE, DEFAULT_PRINT, DEFAULT_REPS, DEFAULT_STRIDE, DEFAULT_TEST,
};
use ccbench::{BarrierBank, CacheLineBuffer, Config, Fatal, FenceLevel, Scenario, Worker, Xorshf96};

/// Measure cache-coherence latencies: loads, stores, CAS, FAI, TAS and SWAP
/// on cache lines left in a chosen MOESI state by other cores
#[derive(Debug, clap::Parser)]
#[command(name = "ccbench", version)]
struct CliArgs {
    /// Number of cores to run the test on
    #[arg(short, long, default_value_t = DEFAULT_CORES, value_parser = clap::value_parser!(u32).range(1..))]
    cores: u32,

    /// Repetitions of the test case
    #[arg(short, long, default_value_t = DEFAULT_REPS, value_parser = clap::value_parser!(u32).range(1..))]
    repetitions: u32,

    /// Test case to run. See --list for the supported events
    #[arg(short, long, default_value_t = DEFAULT_TEST, value_parser = clap::value_parser!(u32).range(0..34))]
    test: u32,

    /// 1st core to use
    #[arg(short = 'x', long, default_value_t = DEFAULT_CORE1)]
    core1: usize,

    /// 2nd core to use
    #[arg(short = 'y', long, default_value_t = DEFAULT_CORE2)]
    core2: usize,

    /// 3rd core to use. Most tests use only 2 cores
    #[arg(short = 'z', long, default_value_t = DEFAULT_CORE3)]
    core3: usize,

    /// Offset for the core that processes with ID >= 3 bind to (core = ID - offset)
    #[arg(short = 'o', long, default_value_t = DEFAULT_CORE_OTHERS)]
    core_others: usize,

    /// Stride in cache lines. A random line in [0, stride) is hit until the
    /// draw is 0, which keeps the prefetchers from hiding the latency.
    /// Rounded up to a power of two
    #[arg(short, long, default_value_t = DEFAULT_STRIDE)]
    stride: u32,

    /// Fence level {n}
    /// 0 = none / 1 = load-store / 2 = full / 3 = load-none / 4 = none-store {n}
    /// 5 = full-none / 6 = none-full / 7 = full-store / 8 = load-full / 9 = double write
    #[arg(short = 'e', long, default_value_t = DEFAULT_FENCE)]
    fence: u32,

    /// Memory size, with optional k/m/g suffix (default: 1Mi lines of 64 bytes)
    #[arg(short, long, value_parser = parse_size)]
    mem_size: Option<usize>,

    /// Flush the cache line before every repetition
    #[arg(short, long)]
    flush: bool,

    /// Make the atomic operations succeed (e.g. TAS_ON_SHARED)
    #[arg(short = 'u', long)]
    success: bool,

    /// Print raw measurements
    #[arg(short, long)]
    verbose: bool,

    /// How many raw measurements to print; implies --verbose
    #[arg(short, long)]
    print: Option<u32>,

    /// List the supported events and exit
    #[arg(long)]
    list: bool,
}

impl CliArgs {
    fn config(&self) -> Config {
        let mut config = Config {
            cores: self.cores,
            repetitions: self.repetitions,
            scenario: Scenario::from_id(self.test).unwrap_or(Scenario::StoreOnModified),
            core1: self.core1,
            core2: self.core2,
            core3: self.core3,
            core_others: self.core_others,
            stride: pow2roundup(self.stride),
            fence: FenceLevel::from_level(self.fence),
            flush: self.flush,
            success: self.success,
            verbose: self.verbose || self.print.is_some(),
            print_count: self.print.unwrap_or(DEFAULT_PRINT),
            ..Config::default()
        };

        if let Some(mem_size) = self.mem_size {
            config.mem_size = mem_size;
        }

        config
    }
}

fn print_events() {
    println!("Supported events: ");
    for scenario in Scenario::ALL {
        println!("      {:2} - {}", scenario.id(), scenario);
    }
}

fn print_header(config: &Config) {
    if config.mem_size != Config::default().mem_size {
        println!("Data size : {} KiB", config.mem_size / 1024);
    }

    let mut line = format!(
        "test: {:>20}  / #cores: {} / #repetitions: {} / stride: {} ({} kiB)",
        config.scenario,
        config.cores,
        config.repetitions,
        config.stride,
        (64 * config.stride as u64) / 1024
    );
    if config.flush {
        line.push_str(" / flush");
    }
    line.push_str("  / fence:  ");
    line.push_str(config.fence.describe());
    println!("{}", line);

    let mut line = format!("core1: {:3} / core2: {:3} ", config.core1, config.core2);
    if config.cores >= 3 {
        line.push_str(&format!("/ core3: {:3}", config.core3));
    }
    println!("{}", line);
}

/// Fork `cores - 1` children. Returns this process' ID and, in the leader,
/// the children's pids
fn spawn_workers(cores: u32) -> Result<(u32, Vec<libc::pid_t>)> {
    let mut children = Vec::new();

    for rank in 1..cores {
        match unsafe { libc::fork() } {
            -1 => {
                let err = std::io::Error::last_os_error();
                for &pid in &children {
                    unsafe { libc::kill(pid, libc::SIGKILL) };
                }
                bail!("Failure in fork(): {}", err);
            }
            0 => return Ok((rank, Vec::new())),
            pid => {
                debug!("forked worker {} as pid {}", rank, pid);
                children.push(pid);
            }
        }
    }

    Ok((0, children))
}

fn reap(children: &[libc::pid_t]) {
    for &pid in children {
        let mut status = 0;
        if unsafe { libc::waitpid(pid, &mut status, 0) } < 0 {
            warn!("waitpid({}) failed: {}", pid, std::io::Error::last_os_error());
        } else if !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
            warn!("worker pid {} ended with status {}", pid, status);
        }
    }
}

fn run(config: &Config) -> Result<()> {
    // Before any allocation, so that the leader's memory is local to core1
    set_cpu(config.core1)?;

    match SystemInfo::new() {
        Ok(info) => {
            info.check_line_size();
            for id in 0..config.cores {
                let core = config.core_for(id);
                if !info.has_core(core) {
                    warn!("process {} binds to core {} but only {} cpus are configured", id, core, info.num_cpus);
                }
            }
        }
        Err(e) => warn!("{:#}", e),
    }

    print_header(config);

    let barriers = BarrierBank::initialize(config.cores)?;
    let rng = Xorshf96::from_tsc();
    let buffer = CacheLineBuffer::open(config)?;
    buffer.prepare(config.scenario);

    let (id, children) = spawn_workers(config.cores)?;

    let core = config.core_for(id);
    set_cpu(core)?;
    info!("process {} running on core {}", id, core);

    Worker::new(id, config, &barriers, &buffer, rng).run();

    if id == 0 {
        reap(&children);
    }

    buffer.close(id);
    barriers.teardown(id);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    if args.list {
        print_events();
        return;
    }

    let config = args.config();
    if let Err(e) = config.validate() {
        eprintln!("assertion failed: {}", e);
        process::abort();
    }

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        let code = e.downcast_ref::<Fatal>().map_or(1, |fatal| fatal.exit_code());
        process::exit(code);
    }
}
