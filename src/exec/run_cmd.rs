use std::fs::File;
use std::io::{self, stderr, stdout, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Run a subprocess to completion, writing its stdout and stderr to the given files.
/// With `echo`, both streams are also copied to our own stdout/stderr as they arrive.
/// Based on:
/// <https://stackoverflow.com/questions/66060139/how-to-tee-stdout-stderr-from-a-subprocess-in-rust>
pub fn run_cmd(cmd: &mut Command, out_file: File, err_file: File, echo: bool) -> io::Result<ExitStatus> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (Some(child_out), Some(child_err)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        return Err(io::Error::new(io::ErrorKind::Other, "cannot attach to child output"));
    };

    let thread_out = thread::spawn(move || {
        let echo: Box<dyn Write> = if echo { Box::new(stdout()) } else { Box::new(io::sink()) };
        communicate(child_out, out_file, echo)
    });
    let thread_err = thread::spawn(move || {
        let echo: Box<dyn Write> = if echo { Box::new(stderr()) } else { Box::new(io::sink()) };
        communicate(child_err, err_file, echo)
    });

    let relayed_out = join_relay(thread_out);
    let relayed_err = join_relay(thread_err);
    let status = child.wait()?;

    relayed_out?;
    relayed_err?;
    Ok(status)
}

fn join_relay(handle: thread::JoinHandle<io::Result<()>>) -> io::Result<()> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output relay thread panicked")))
}

fn communicate<R: Read, W: Write>(mut stream: R, mut file: File, mut output: W) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }

        let buf = &buf[..num_read];
        file.write_all(buf)?;
        output.write_all(buf)?;
    }
    file.flush()?;

    Ok(())
}
