use anyhow::{Context, Result};

use crate::{arch, inferior::Inferior, prot};

/// mprotect's number in the legacy i386 syscall table. The trap below enters
/// the kernel through the 32-bit compat path, so the i386 numbering applies,
/// not the x86-64 one.
pub const SYS_MPROTECT_I386: u64 = 0x7d;

/// `int 0x80`, the legacy 32-bit syscall trap.
pub const INT80: [u8; 2] = [0xcd, 0x80];

impl Inferior {
    /// Force the stopped target through one legacy int 0x80 syscall, then
    /// put everything back the way it was.
    ///
    /// The i386 convention reads the number from eax and up to three
    /// arguments from ebx, ecx and edx, which is exactly the register set a
    /// [`PatchFrame`] preserves. Arguments travel through 32-bit registers,
    /// so values above 4 GiB do not survive the trip. The raw return value
    /// comes back undecoded: 0 or a positive result on success, -errno on
    /// failure.
    pub fn inject_syscall3(&mut self, nr: u64, args: [u64; 3]) -> Result<i64> {
        self.ensure_stopped()?;
        arch::ensure_amd64(self.pid())?;

        let mut frame = PatchFrame::capture(self)?;
        let attempt = frame.run(nr, args);
        let restored = frame.restore();

        // A failed attempt wins over a failed restore, but the restore ran
        // either way.
        let value = attempt?;
        restored?;
        Ok(value)
    }

    /// Call mprotect(addr, length, prot) inside the stopped target.
    ///
    /// `prot` is decoded with [`prot::decode`]. `addr` and `length` go to
    /// the kernel exactly as given; alignment and page rounding are
    /// mprotect(2)'s business.
    pub fn mprotect(&mut self, addr: u64, length: u64, prot: &str) -> Result<i64> {
        let mask = prot::decode(prot);
        self.inject_syscall3(SYS_MPROTECT_I386, [addr, length, mask])
    }
}

/// Everything the injection clobbers, captured before the first write.
///
/// The frame borrows the target exclusively until it is restored, and
/// dropping an unrestored frame restores as a last resort, so no exit path
/// leaves the trap bytes in place.
pub struct PatchFrame<'a> {
    inferior: &'a mut Inferior,
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rip: u64,
    text: [u8; 2],
    armed: bool,
}

impl<'a> PatchFrame<'a> {
    /// Save the four syscall registers, the instruction pointer and the two
    /// code bytes the trap will overwrite.
    pub fn capture(inferior: &'a mut Inferior) -> Result<Self> {
        let regs = inferior.registers()?;
        let text: [u8; 2] = inferior
            .read_bytes(regs.rip, INT80.len())?
            .try_into()
            .unwrap();
        Ok(Self {
            rax: regs.rax,
            rbx: regs.rbx,
            rcx: regs.rcx,
            rdx: regs.rdx,
            rip: regs.rip,
            text,
            armed: true,
            inferior,
        })
    }

    /// The patched target, for callers composing their own sequence.
    pub fn inferior(&mut self) -> &mut Inferior {
        self.inferior
    }

    /// Put the saved bytes and registers back, bytes first so the restored
    /// rip points at restored code.
    pub fn restore(mut self) -> Result<()> {
        self.armed = false;
        self.apply()
    }

    fn run(&mut self, nr: u64, args: [u64; 3]) -> Result<i64> {
        let rip = self.rip;
        let inferior = &mut *self.inferior;

        let mut regs = inferior.registers()?;
        regs.rax = nr;
        regs.rbx = args[0];
        regs.rcx = args[1];
        regs.rdx = args[2];
        inferior.set_registers(&regs)?;
        inferior.write_bytes(rip, &INT80)?;
        inferior
            .single_step()
            .context("the injected syscall never completed")?;

        let after = inferior.registers()?;
        Ok(after.rax as i64)
    }

    fn apply(&mut self) -> Result<()> {
        let rip = self.rip;
        let text = self.text;
        let inferior = &mut *self.inferior;

        inferior.write_bytes(rip, &text)?;
        let mut regs = inferior.registers()?;
        regs.rax = self.rax;
        regs.rbx = self.rbx;
        regs.rcx = self.rcx;
        regs.rdx = self.rdx;
        regs.rip = self.rip;
        inferior.set_registers(&regs)?;
        Ok(())
    }
}

impl Drop for PatchFrame<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Abandoned frame: errors here have nowhere to go.
            let _ = self.apply();
        }
    }
}
