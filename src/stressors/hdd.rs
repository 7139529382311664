//! Filesystem stressor: repeated write/read/unlink of a scratch file under
//! the system temp directory, matching stress-ng's `stress_hdd` in spirit
//! (it also supports O_DIRECT and seek patterns; this implements the
//! sequential-write-then-read baseline only).

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use super::{Args, RunResult};

const BUF_LEN: usize = 64 * 1024;

pub fn supported() -> bool {
    std::env::temp_dir().metadata().map(|m| m.is_dir()).unwrap_or(false)
}

pub fn run(args: &mut Args) -> RunResult {
    if !supported() {
        return RunResult::NoResource;
    }

    let path = std::env::temp_dir().join(format!("stressforge-hdd-{}-{}", args.pid, args.instance));
    let buf = vec![0xA5u8; BUF_LEN];
    let mut read_buf = vec![0u8; BUF_LEN];

    let mut file = match OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(_) => return RunResult::NoResource,
    };

    let result = (|| -> std::io::Result<()> {
        while args.should_continue() {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&buf)?;
            file.flush()?;
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut read_buf)?;
            if read_buf != buf {
                return Err(std::io::Error::other("readback mismatch"));
            }
            args.bump(1);
            args.mark_counter_ready();
        }
        Ok(())
    })();

    let _ = std::fs::remove_file(&path);

    match result {
        Ok(()) => {
            args.mark_run_ok(true);
            RunResult::Success
        }
        Err(_) => {
            args.mark_run_ok(false);
            RunResult::Failure
        }
    }
}
