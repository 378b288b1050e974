//! Child processes for the OCR and embedding collaborators.

use std::io::{self, Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

/// Run `cmd` to completion, feeding it `stdin` and collecting both output
/// pipes on their own threads so a chatty child can never wedge the pipes.
///
/// Returns `Ok(None)` when `deadline` passed first; the child has then been
/// killed and reaped.
pub fn run(cmd: &mut Command, stdin: Option<Vec<u8>>, deadline: Option<Instant>) -> io::Result<Option<Output>> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // A child that exits without reading everything closes the pipe; that
        // shows up in its exit status, not here.
        thread::spawn(move || {
            let _ = pipe.write_all(&bytes);
        });
    }
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match deadline {
        None => child.wait()?,
        Some(deadline) => loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            let now = Instant::now();
            if now >= deadline {
                // Readers are left to hit EOF on their own.
                child.kill()?;
                child.wait()?;
                return Ok(None);
            }
            thread::sleep(POLL.min(deadline - now));
        },
    };

    Ok(Some(Output { status, stdout: collect(stdout)?, stderr: collect(stderr)? }))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match reader {
        Some(handle) => handle.join().map_err(|_| io::Error::other("pipe reader panicked"))?,
        None => Ok(Vec::new()),
    }
}
