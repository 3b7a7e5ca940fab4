//! Logging bootstrap.
//!
//! Diagnostics go through `tracing`; this module wires the subscriber
//! to a rotating file sink under the configured log directory. Keeping
//! `<name>.log` through `<name>.5.log`, rotation happens at open by
//! renaming `.i.log` to `.(i+1).log`. The elevated child appends to
//! the newest existing log instead of rotating so both processes share
//! one file, and tags its lines. Guest supervisor output is mirrored
//! under the [`VM_TARGET`] target into a sibling `<name>-vm.log` sink.

use crate::error::{CoreError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tracing target reserved for mirrored guest output.
pub const VM_TARGET: &str = "vm";

/// How many rotated files are kept per log name.
const LOG_COUNT: u32 = 5;

/// File sink that optionally tags each write.
struct TaggedFile {
    file: File,
    tag: Option<&'static str>,
}

impl Write for TaggedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(tag) = self.tag {
            self.file.write_all(tag.as_bytes())?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Installs the global subscriber.
///
/// `elevated_child` switches to append-to-latest (no rotation) with a
/// `[child]` line tag. `with_vm_sink` additionally opens the
/// `<name>-vm.log` sink receiving [`VM_TARGET`] events.
pub fn init(log_dir: &Path, name: &str, elevated_child: bool, with_vm_sink: bool) -> Result<()> {
    let main = if elevated_child {
        open_latest(log_dir, name)?
    } else {
        rotate_and_create(log_dir, name)?
    };
    let main = TaggedFile {
        file: main,
        tag: elevated_child.then_some("[child] "),
    };

    let main_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(main))
        .with_filter(filter_fn(|meta| meta.target() != VM_TARGET));

    let vm_layer = if with_vm_sink {
        let vm = rotate_and_create(log_dir, &format!("{name}-vm"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_level(false)
                .with_writer(Mutex::new(vm))
                .with_filter(filter_fn(|meta| meta.target() == VM_TARGET)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(main_layer)
        .with(vm_layer)
        .try_init()
        .map_err(|e| CoreError::config(format!("failed to install subscriber: {e}")))?;

    Ok(())
}

/// Creates a fresh rotated log file and returns its path; used for the
/// logs external tools (`dism`, `msiexec`) write themselves.
pub fn create_aux_log(log_dir: &Path, name: &str) -> Result<PathBuf> {
    let file = rotate_and_create(log_dir, name)?;
    drop(file);
    Ok(log_dir.join(format!("{name}.log")))
}

/// Shifts `<name>[.i].log` up by one slot and opens a fresh
/// `<name>.log`.
fn rotate_and_create(dir: &Path, name: &str) -> Result<File> {
    for i in (1..LOG_COUNT).rev() {
        let from = dir.join(slot_name(name, i));
        if from.exists() {
            let to = dir.join(slot_name(name, i + 1));
            std::fs::rename(&from, &to).map_err(|e| {
                CoreError::config(format!("cannot rotate log file {}: {e}", from.display()))
            })?;
        }
    }

    let path = dir.join(slot_name(name, 1));
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&path)
        .map_err(|e| CoreError::config(format!("cannot open log file {}: {e}", path.display())))
}

/// Opens the newest existing log for appending; the elevated child
/// shares the parent's file.
fn open_latest(dir: &Path, name: &str) -> Result<File> {
    for i in 1..=LOG_COUNT {
        let path = dir.join(slot_name(name, i));
        if path.exists() {
            return OpenOptions::new().append(true).open(&path).map_err(|e| {
                CoreError::config(format!("cannot open log file {}: {e}", path.display()))
            });
        }
    }

    // No parent log yet; fall back to a fresh file.
    rotate_and_create(dir, name)
}

fn slot_name(name: &str, slot: u32) -> String {
    if slot == 1 {
        format!("{name}.log")
    } else {
        format!("{name}.{slot}.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_shifts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vm.log"), b"first").unwrap();

        rotate_and_create(dir.path(), "vm").unwrap();
        assert_eq!(std::fs::read(dir.path().join("vm.2.log")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("vm.log")).unwrap(), b"");

        std::fs::write(dir.path().join("vm.log"), b"second").unwrap();
        rotate_and_create(dir.path(), "vm").unwrap();

        assert_eq!(std::fs::read(dir.path().join("vm.2.log")).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.path().join("vm.3.log")).unwrap(), b"first");
    }

    #[test]
    fn rotation_caps_at_five_slots() {
        let dir = tempfile::tempdir().unwrap();
        for round in 0..8 {
            std::fs::write(dir.path().join("vm.log"), format!("round {round}")).unwrap();
            rotate_and_create(dir.path(), "vm").unwrap();
        }

        let logs: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(logs.len() <= LOG_COUNT as usize);
        assert!(!logs.contains(&"vm.6.log".to_string()));
    }

    #[test]
    fn child_appends_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vm.log"), b"parent\n").unwrap();

        let mut file = open_latest(dir.path(), "vm").unwrap();
        file.write_all(b"child\n").unwrap();
        drop(file);

        assert_eq!(
            std::fs::read(dir.path().join("vm.log")).unwrap(),
            b"parent\nchild\n"
        );
    }

    #[test]
    fn tagged_writer_prefixes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let mut writer = TaggedFile {
            file: File::create(&path).unwrap(),
            tag: Some("[child] "),
        };
        writer.write_all(b"hello\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[child] hello\n");
    }
}
