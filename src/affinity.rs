use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::cache_line::CACHE_LINE_SIZE;
use crate::Fatal;

/// Pin the calling process to `core`
pub fn set_cpu(core: usize) -> Result<()> {
    unsafe {
        if core >= libc::CPU_SETSIZE as usize {
            return Err(anyhow::anyhow!("core {} is beyond the CPU set size", core)).context(Fatal::Affinity);
        }

        let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpu_set);
        libc::CPU_SET(core, &mut cpu_set);

        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set) != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Couldn't bind to core {}", core))
                .context(Fatal::Affinity);
        }
    }

    debug!("pinned to core {}", core);
    Ok(())
}

/// Hardware facts the benchmark depends on
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    /// Number of configured logical CPUs in the system
    pub num_cpus: i64,
    /// L1 data cache line size in bytes
    pub cline_size: i64,
}

impl SystemInfo {
    /// Get cache line size
    ///
    /// Works on Linux through `sysconf`. Some kernels report 0 when the value
    /// is unknown; that is passed on as is
    fn get_cache_line_size() -> Result<i64> {
        // Not exported by every libc target
        const _SC_LEVEL1_DCACHE_LINESIZE: libc::c_int = 190;

        let cline_size = unsafe { libc::sysconf(_SC_LEVEL1_DCACHE_LINESIZE) };
        if cline_size == -1 {
            bail!("\"sysconf()\" returned an error");
        }

        Ok(cline_size as i64)
    }

    pub fn new() -> Result<Self> {
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        if num_cpus < 1 {
            bail!("Couldn't get the number of configured CPUs");
        }

        let cline_size = Self::get_cache_line_size().context("Error while obtaining cache line size")?;

        Ok(Self {
            num_cpus: num_cpus as i64,
            cline_size,
        })
    }

    /// Complain about a line size the buffer layout does not match
    pub fn check_line_size(&self) {
        if self.cline_size > 0 && self.cline_size != CACHE_LINE_SIZE as i64 {
            warn!(
                "L1 data cache line is {} bytes but the benchmark lays lines out every {} bytes; results may mix lines",
                self.cline_size, CACHE_LINE_SIZE
            );
        }
    }

    /// Whether `core` names a configured CPU
    pub fn has_core(&self, core: usize) -> bool {
        (core as i64) < self.num_cpus
    }
}
