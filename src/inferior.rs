use std::{error::Error, ffi::CString, fmt};

use anyhow::{Context, Result, bail};
use libc::user_regs_struct;
use nix::{
    sys::{
        ptrace,
        signal::{self, Signal},
        wait::{WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, execv, fork},
};

const WORD: usize = std::mem::size_of::<libc::c_long>();

/// A process stopped under ptrace.
///
/// Every register and memory access to the target flows through one of
/// these, so an operation's side effects are visible in its signature
/// instead of reaching into whatever process a session happens to hold.
#[derive(Debug)]
pub struct Inferior {
    pid: Pid,
    alive: bool,
    owned: bool,
}

impl Inferior {
    /// Attach to a running process and wait for it to enter a signal stop.
    pub fn attach(pid: Pid) -> Result<Self> {
        ptrace::attach(pid).with_context(|| format!("failed to attach to pid {pid}"))?;
        let status =
            waitpid(pid, None).with_context(|| format!("failed waiting for pid {pid} to stop"))?;
        match status {
            WaitStatus::Stopped(_, _) => Ok(Self {
                pid,
                alive: true,
                owned: false,
            }),
            other => bail!("pid {pid} did not stop after attach: {other:?}"),
        }
    }

    /// Fork and exec `path` under PTRACE_TRACEME, returning a handle held at
    /// the post-exec trap.
    pub fn spawn(path: &str, args: &[&str]) -> Result<Self> {
        let prog = CString::new(path).context("program path contains a NUL byte")?;
        let mut argv = vec![prog.clone()];
        for arg in args {
            argv.push(CString::new(*arg).context("argument contains a NUL byte")?);
        }

        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                // Only async-signal-safe calls between fork and exec.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(126) };
                }
                let _ = execv(&prog, &argv);
                unsafe { libc::_exit(127) }
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None)
                    .with_context(|| format!("failed waiting for spawned pid {child}"))?;
                match status {
                    WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(Self {
                        pid: child,
                        alive: true,
                        owned: true,
                    }),
                    WaitStatus::Exited(_, code) => {
                        bail!("{path} exited with status {code} before it could be traced")
                    }
                    other => bail!("spawned pid {child} did not reach the exec trap: {other:?}"),
                }
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Refuse before anything is mutated when the target is gone or no
    /// longer in a ptrace stop we own.
    pub fn ensure_stopped(&self) -> Result<(), InferiorError> {
        if !self.alive || signal::kill(self.pid, None).is_err() {
            return Err(InferiorError::Gone { pid: self.pid });
        }
        // Register access fails with ESRCH for a tracee that is running or
        // was never ours, which is exactly the state we must not touch.
        match ptrace::getregs(self.pid) {
            Ok(_) => Ok(()),
            Err(_) => Err(InferiorError::NotStopped { pid: self.pid }),
        }
    }

    /// Snapshot the general-purpose register file.
    pub fn registers(&self) -> Result<user_regs_struct> {
        ptrace::getregs(self.pid)
            .with_context(|| format!("failed to read registers of pid {}", self.pid))
    }

    pub fn set_registers(&mut self, regs: &user_regs_struct) -> Result<()> {
        ptrace::setregs(self.pid, *regs)
            .with_context(|| format!("failed to write registers of pid {}", self.pid))
    }

    /// Read `len` bytes of target memory starting at `addr`.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len + WORD);
        let mut pos = addr;
        while out.len() < len {
            let word = self.peek(pos)?;
            out.extend_from_slice(&word.to_ne_bytes());
            pos += WORD as u64;
        }
        out.truncate(len);
        Ok(out)
    }

    /// Write `data` into target memory at `addr`.
    ///
    /// POKEDATA moves whole words, so partial words at either edge are
    /// read-modify-written to leave the neighboring bytes untouched. Writes
    /// land even on pages the target itself could not write, which is the
    /// point: the usual patch site is a read-only text page.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let mut pos = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let word_addr = pos & !(WORD as u64 - 1);
            let offset = (pos - word_addr) as usize;
            let take = rest.len().min(WORD - offset);
            let mut bytes = if offset == 0 && take == WORD {
                [0u8; WORD]
            } else {
                self.peek(word_addr)?.to_ne_bytes()
            };
            bytes[offset..offset + take].copy_from_slice(&rest[..take]);
            self.poke(word_addr, libc::c_long::from_ne_bytes(bytes))?;
            pos += take as u64;
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Resume for exactly one instruction and wait for the resulting stop.
    pub fn single_step(&mut self) -> Result<()> {
        ptrace::step(self.pid, None::<Signal>)
            .with_context(|| format!("single-step request for pid {} failed", self.pid))?;
        let status = waitpid(self.pid, None)
            .with_context(|| format!("failed waiting for pid {} after single-step", self.pid))?;
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(()),
            WaitStatus::Stopped(_, sig) => bail!(
                "pid {} stopped with {} instead of the step trap",
                self.pid,
                sig.as_str()
            ),
            WaitStatus::Exited(_, code) => {
                self.alive = false;
                bail!("pid {} exited with status {code} during single-step", self.pid)
            }
            WaitStatus::Signaled(_, sig, _) => {
                self.alive = false;
                bail!(
                    "pid {} was killed by {} during single-step",
                    self.pid,
                    sig.as_str()
                )
            }
            other => bail!("unexpected wait status after single-step: {other:?}"),
        }
    }

    /// Detach and let the target run free again.
    pub fn detach(mut self) -> Result<()> {
        self.alive = false;
        ptrace::detach(self.pid, None::<Signal>)
            .with_context(|| format!("failed to detach from pid {}", self.pid))
    }

    /// Kill a spawned target and reap it.
    pub fn kill(mut self) -> Result<()> {
        self.alive = false;
        signal::kill(self.pid, Signal::SIGKILL)
            .with_context(|| format!("failed to kill pid {}", self.pid))?;
        waitpid(self.pid, None).with_context(|| format!("failed to reap pid {}", self.pid))?;
        Ok(())
    }

    fn peek(&self, addr: u64) -> Result<libc::c_long> {
        ptrace::read(self.pid, addr as usize as ptrace::AddressType)
            .with_context(|| format!("failed to read memory of pid {} at {addr:#x}", self.pid))
    }

    fn poke(&mut self, addr: u64, word: libc::c_long) -> Result<()> {
        ptrace::write(self.pid, addr as usize as ptrace::AddressType, word)
            .with_context(|| format!("failed to write memory of pid {} at {addr:#x}", self.pid))
    }
}

impl Drop for Inferior {
    fn drop(&mut self) {
        if !self.alive {
            return;
        }
        // A handle dropped on an error path must not leave a stopped process
        // behind; errors here have nowhere to go.
        if self.owned {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        } else {
            let _ = ptrace::detach(self.pid, None::<Signal>);
        }
    }
}

/// Run-state refusals raised before an operation touches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferiorError {
    Gone { pid: Pid },
    NotStopped { pid: Pid },
}

impl fmt::Display for InferiorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferiorError::Gone { pid } => write!(f, "pid {pid} is not running"),
            InferiorError::NotStopped { pid } => {
                write!(f, "pid {pid} is not stopped under trace")
            }
        }
    }
}

impl Error for InferiorError {}
