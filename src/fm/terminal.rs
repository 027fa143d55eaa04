//! Everything the tool prints goes through [`Terminal`].

use crate::fm::config::ToolFlags;
use chrono::Local;
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const BLUE: &str = "\x1b[34m";
pub const MAGENTA: &str = "\x1b[35m";
pub const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub struct Painter {
    enabled: bool,
}

impl Painter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn wrap(&self, s: &str, color: &str) -> String {
        if self.enabled {
            format!("{color}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn ok(&self, s: &str) -> String {
        self.wrap(s, GREEN)
    }

    pub fn failed(&self, s: &str) -> String {
        self.wrap(s, RED)
    }

    pub fn blue(&self, s: &str) -> String {
        self.wrap(s, BLUE)
    }

    pub fn magenta(&self, s: &str) -> String {
        self.wrap(s, MAGENTA)
    }
}

/// In-memory sink, handy for inspecting output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn contents(&self) -> String {
        let g = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&g).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Terminal {
    out: Box<dyn Write + Send>,
    flags: ToolFlags,
    is_tty: bool,
    paint: Painter,
}

impl Terminal {
    pub fn stdout() -> Self {
        let is_tty = io::stdout().is_terminal();
        Self {
            out: Box::new(io::stdout()),
            flags: ToolFlags::default(),
            is_tty,
            paint: Painter::new(is_tty),
        }
    }

    /// Uncolored terminal writing into a fresh [`OutputBuffer`].
    pub fn buffered() -> (Self, OutputBuffer) {
        let buf = OutputBuffer::default();
        let term = Self {
            out: Box::new(buf.clone()),
            flags: ToolFlags::default(),
            is_tty: false,
            paint: Painter::new(false),
        };
        (term, buf)
    }

    pub fn flags(&self) -> ToolFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ToolFlags) {
        self.flags = flags;
        self.paint = Painter::new(self.is_tty && !flags.no_color);
    }

    pub fn paint(&self) -> Painter {
        self.paint
    }

    /// Always printed.
    pub fn say(&mut self, msg: &str) {
        let _ = writeln!(self.out, "{msg}");
    }

    /// Progress output; silenced by `--quiet`.
    pub fn note(&mut self, msg: &str) {
        if !self.flags.quiet {
            self.say(msg);
        }
    }

    /// Like [`note`](Self::note) but without the trailing newline.
    pub fn note_inline(&mut self, msg: &str) {
        if !self.flags.quiet {
            let _ = write!(self.out, "{msg}");
            let _ = self.out.flush();
        }
    }

    /// Only printed with `--verbose`.
    pub fn info(&mut self, msg: &str) {
        if self.flags.verbose {
            self.say(msg);
        }
    }

    /// Timestamped diagnostic line on stderr, verbose mode only.
    pub fn event(&self, component: &str, node: Option<&str>, msg: impl AsRef<str>) {
        if !self.flags.verbose {
            return;
        }
        let ts = Local::now().format("%Y-%m-%d_%H:%M:%S%.3f");
        match node {
            Some(n) => eprintln!("{ts} [{component}] node={n} {}", msg.as_ref()),
            None => eprintln!("{ts} [{component}] {}", msg.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_respects_quiet() {
        let (mut t, buf) = Terminal::buffered();
        t.note("hello world");
        assert_eq!(buf.contents(), "hello world\n");

        buf.clear();
        t.set_flags(ToolFlags {
            quiet: true,
            ..Default::default()
        });
        t.note("hello world");
        t.note_inline("...");
        assert_eq!(buf.contents(), "");
        t.say("still here");
        assert_eq!(buf.contents(), "still here\n");
    }

    #[test]
    fn info_requires_verbose() {
        let (mut t, buf) = Terminal::buffered();
        t.info("hello info");
        assert_eq!(buf.contents(), "");
        t.set_flags(ToolFlags {
            verbose: true,
            ..Default::default()
        });
        t.info("hello info");
        assert_eq!(buf.contents(), "hello info\n");
    }

    #[test]
    fn painter_toggles() {
        assert_eq!(Painter::new(false).ok("OK"), "OK");
        assert_eq!(Painter::new(true).ok("OK"), format!("{GREEN}OK{RESET}"));
    }
}
