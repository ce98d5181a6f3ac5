//! Process lifecycle: fork, exec handoff, and monitoring.

#![allow(unsafe_code)]

use std::ffi::CString;

use crossbeam_channel::unbounded;

use porter_common::{PorterError, PorterPaths, PorterResult};
use porter_oci::Spec;

use crate::engine::config::CommonConfig;
use crate::engine::create::Engine;
use crate::rpc::Helper;

/// Create the container and hand control to its payload.
///
/// Forks: the child spawns the privileged helper, builds the container,
/// and execs the payload; the parent monitors it and returns the
/// payload's exit code. For instances the parent detaches instead of
/// monitoring and returns zero.
pub fn run(common: CommonConfig, paths: PorterPaths) -> PorterResult<i32> {
    let is_instance = common.engine_config.is_instance;
    let container_id = common.container_id.clone();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(PorterError::Io(std::io::Error::last_os_error()));
    }
    if pid == 0 {
        run_child(&common, &paths)
    }

    let pid = pid as u32;
    tracing::debug!(container_id = %container_id, pid, "Engine process forked");

    if is_instance {
        tracing::info!(container_id = %container_id, pid, "Instance created, not monitoring");
        return Ok(0);
    }

    monitor_container(pid)
}

/// The forked engine branch. Never returns: either the payload exec
/// replaces this process image, or the process exits with a failure.
fn run_child(common: &CommonConfig, paths: &PorterPaths) -> ! {
    if let Err(e) = create_and_exec(common, paths) {
        tracing::error!(error = %e, "Container startup failed");
    }
    std::process::exit(1);
}

fn create_and_exec(common: &CommonConfig, paths: &PorterPaths) -> PorterResult<()> {
    let mut helper = Helper::spawn()?;
    let conn = helper
        .take_stream()
        .ok_or_else(|| PorterError::RpcInitFailed {
            reason: "helper channel already taken".to_string(),
        })?;

    let engine = Engine::new(common.clone(), paths.clone());
    engine.create_container(std::process::id(), conn)?;

    start_process(engine.spec())
}

/// Replace the current process image with the spec's payload.
///
/// On success this does not return; the helper's channel end closes with
/// the exec and the helper exits on EOF.
pub fn start_process(spec: &Spec) -> PorterResult<()> {
    let process = spec.process.as_ref().ok_or_else(|| PorterError::Config {
        message: "spec has no process block".to_string(),
    })?;
    if process.args.is_empty() {
        return Err(PorterError::Config {
            message: "spec process has no arguments".to_string(),
        });
    }

    std::env::set_current_dir("/")?;

    let command = process.args[0].clone();
    let program = CString::new(command.clone()).map_err(std::io::Error::from)?;
    let args = process
        .args
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;
    let env = process
        .env
        .iter()
        .map(|e| CString::new(e.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;

    let mut argv: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
    argv.push(std::ptr::null());
    let mut envp: Vec<*const libc::c_char> = env.iter().map(|e| e.as_ptr()).collect();
    envp.push(std::ptr::null());

    tracing::debug!(command = %command, "Handing off to container process");

    unsafe { libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr()) };

    Err(PorterError::ExecFailed {
        command,
        reason: std::io::Error::last_os_error().to_string(),
    })
}

/// Wait for `pid` to terminate and translate its status into an exit
/// code: the payload's own code, or 128 plus the terminating signal.
///
/// A dedicated watcher thread forwards blocked signals over a channel;
/// any non-child signal interrupts monitoring with an error.
pub fn monitor_container(pid: u32) -> PorterResult<i32> {
    let signals = [libc::SIGCHLD, libc::SIGINT, libc::SIGTERM];

    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for sig in signals {
            libc::sigaddset(&mut set, sig);
        }
    }
    // Block in this thread before spawning the watcher so no delivery
    // slips through to the default handlers.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(PorterError::Io(std::io::Error::from_raw_os_error(rc)));
    }

    let (tx, rx) = unbounded::<i32>();
    std::thread::spawn(move || {
        loop {
            let mut sig: libc::c_int = 0;
            if unsafe { libc::sigwait(&set, &mut sig) } != 0 {
                break;
            }
            if tx.send(sig).is_err() {
                break;
            }
        }
    });

    let pid_t = pid as libc::pid_t;
    tracing::debug!(pid, "Monitoring container process");

    loop {
        let signal = rx.recv().map_err(|_| PorterError::Internal {
            message: "signal watcher channel closed".to_string(),
        })?;

        if signal != libc::SIGCHLD {
            tracing::debug!(signal, "Monitoring interrupted");
            return Err(PorterError::MonitorInterrupted { signal });
        }

        loop {
            let mut status: libc::c_int = 0;
            let reaped = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if reaped <= 0 {
                // Nothing else ready; wait for the next signal.
                break;
            }
            if reaped != pid_t {
                tracing::debug!(reaped, "Reaped unrelated child");
                continue;
            }

            if libc::WIFEXITED(status) {
                let code = libc::WEXITSTATUS(status);
                tracing::debug!(pid, code, "Container process exited");
                return Ok(code);
            }
            if libc::WIFSIGNALED(status) {
                let signal = libc::WTERMSIG(status);
                tracing::debug!(pid, signal, "Container process killed by signal");
                return Ok(128 + signal);
            }
        }
    }
}
