//! Interactive stop: `q` + Enter on stdin, or Ctrl-C.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::read;
use rollcall_core::{StopFlag, StopSignal};
use std::io::{self, Stdin};
use std::os::fd::AsFd;

const READ_CHUNK: usize = 256;

/// Polled by the session loop between frames; never blocks.
///
/// Bytes are read straight from the descriptor and buffered here, so every
/// line typed since the last poll is seen.
pub struct KeyboardStop<F = Stdin> {
    flag: StopFlag,
    input: F,
    input_open: bool,
    pending: Vec<u8>,
}

impl KeyboardStop<Stdin> {
    /// `flag` is shared with the Ctrl-C handler.
    pub fn new(flag: StopFlag) -> Self {
        Self::with_input(flag, io::stdin())
    }
}

impl<F: AsFd> KeyboardStop<F> {
    pub fn with_input(flag: StopFlag, input: F) -> Self {
        Self {
            flag,
            input,
            input_open: true,
            pending: Vec::new(),
        }
    }

    /// Move everything readable right now into `pending`.
    fn drain_input(&mut self) {
        while self.input_open {
            let mut fds = [PollFd::new(self.input.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) | Err(Errno::EINTR) => return,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "stdin poll failed; keyboard stop disabled");
                    self.input_open = false;
                    return;
                }
            }
            let ready = fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
            if !ready {
                return;
            }

            let mut chunk = [0u8; READ_CHUNK];
            match read(self.input.as_fd(), &mut chunk) {
                Ok(0) => {
                    tracing::debug!("stdin closed; use Ctrl-C to stop");
                    self.input_open = false;
                    // An unterminated last line still counts.
                    if self.pending.last().is_some_and(|&b| b != b'\n') {
                        self.pending.push(b'\n');
                    }
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(Errno::EINTR) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed; keyboard stop disabled");
                    self.input_open = false;
                }
            }
        }
    }

    /// Consume complete lines from `pending`; true if any of them was a quit command.
    fn take_quit_line(&mut self) -> bool {
        let mut quit = false;
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            quit |= is_quit_command(&String::from_utf8_lossy(&line));
        }
        quit
    }
}

impl<F: AsFd> StopSignal for KeyboardStop<F> {
    fn stop_requested(&mut self) -> bool {
        if self.flag.is_set() {
            return true;
        }
        self.drain_input();
        if self.take_quit_line() {
            self.flag.request_stop();
            return true;
        }
        false
    }
}

pub fn is_quit_command(line: &str) -> bool {
    let cmd = line.trim();
    cmd.eq_ignore_ascii_case("q") || cmd.eq_ignore_ascii_case("quit")
}
