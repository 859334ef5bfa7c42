//! CPU pinning interface
//!
//! Platform introspection and the actual affinity syscall live outside
//! the control plane; the companion only needs the seam. A pinning
//! failure is logged and never fatal.

/// Pins a process to a CPU.
pub trait CpuPinner: Send + Sync {
    /// Pin `pid` to the given CPU index.
    fn pin(&self, pid: u32, cpu: usize) -> std::io::Result<()>;
}

/// A pinner that accepts every request without touching the OS.
pub struct NoopPinner;

impl CpuPinner for NoopPinner {
    fn pin(&self, _pid: u32, _cpu: usize) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_pinner_accepts_everything() {
        assert!(NoopPinner.pin(1, 0).is_ok());
    }
}
