use std::fs;

use anyhow::{Context, Result, bail};
use goblin::Object;
use nix::unistd::Pid;

/// Refuse unless the executable image behind `/proc/<pid>/exe` is 64-bit x86.
pub fn ensure_amd64(pid: Pid) -> Result<()> {
    let exe = format!("/proc/{pid}/exe");
    let data = fs::read(&exe).with_context(|| format!("failed to read {exe}"))?;
    verify_amd64_image(&data, &exe)
}

/// The classification half of [`ensure_amd64`], on raw image bytes.
///
/// The injected trap is an x86 instruction and the call protocol names
/// x86-64 registers, so everything else is turned away here, before any
/// target state has been touched.
pub fn verify_amd64_image(data: &[u8], origin: &str) -> Result<()> {
    let elf = match Object::parse(data).with_context(|| format!("failed to parse {origin}"))? {
        Object::Elf(elf) => elf,
        other => bail!("{origin} is not an ELF image: {other:?}"),
    };

    if !elf.is_64 {
        bail!("{origin} is a 32-bit image; only x86-64 targets are supported");
    }
    if elf.header.e_machine != goblin::elf::header::EM_X86_64 {
        bail!(
            "{origin} is built for {}; only x86-64 targets are supported",
            goblin::elf::header::machine_to_str(elf.header.e_machine)
        );
    }
    Ok(())
}
