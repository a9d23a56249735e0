//! Rendering collaborator for the 5250 display.
//!
//! The engine never draws anything itself. After each batch of host data or
//! keystrokes it hands a [`ScreenView`] to the attached [`Terminal`], which
//! paints it however it likes. [`TextTerminal`] renders plain text and is what
//! the line-mode client and the tests use.

use std::fmt;
use std::io::Write;

use crate::ebcdic::{is_attribute, CharMap, EBCDIC_BLANK};
use crate::error::{TerminalError, TerminalResult};
use crate::lib5250::buffer::DisplayBuffer;
use crate::lib5250::display::{Indicators, KeyState};

/// Underline bit of a 5250 display attribute
const ATTR_UNDERLINE: u8 = 0x04;
/// Attributes 0x27, 0x2F, 0x37 and 0x3F are non-display
const ATTR_NONDISPLAY_MASK: u8 = 0x07;

/// Read-only view of everything a renderer needs
pub struct ScreenView<'a> {
    pub buffer: &'a DisplayBuffer,
    pub indicators: Indicators,
    pub keystate: KeyState,
    /// Operator error code while the keyboard is in pre-help
    pub key_src: u16,
    pub map: &'a CharMap,
}

impl ScreenView<'_> {
    /// One screen row in local characters. Attribute positions and nulls show
    /// as spaces; with `underscores`, blank cells under an underline attribute
    /// show as `_`.
    pub fn row_text(&self, y: usize, underscores: bool) -> String {
        self.buffer
            .row(y)
            .iter()
            .map(|cell| {
                if is_attribute(cell.ch) || cell.attr & ATTR_NONDISPLAY_MASK == ATTR_NONDISPLAY_MASK {
                    ' '
                } else if cell.ch == 0x00 || cell.ch == EBCDIC_BLANK {
                    if underscores && cell.attr & ATTR_UNDERLINE != 0 {
                        '_'
                    } else {
                        ' '
                    }
                } else {
                    self.map.to_local_char(cell.ch)
                }
            })
            .collect()
    }

    /// The operator information line painted under the screen
    pub fn status_line(&self) -> String {
        let mut line = [b' '; 80];
        let mut put = |at: usize, text: &str| {
            line[at..at + text.len()].copy_from_slice(text.as_bytes());
        };
        put(0, "5250");
        if self.indicators.contains(Indicators::MESSAGE_WAITING) {
            put(23, "MW");
        }
        if self.indicators.contains(Indicators::INHIBIT) {
            put(9, "X II");
        } else if self.indicators.contains(Indicators::X_CLOCK) {
            put(9, "X CLOCK");
        } else if self.indicators.contains(Indicators::X_SYSTEM) {
            put(9, "X SYSTEM");
        }
        if self.indicators.contains(Indicators::INSERT) {
            put(30, "IM");
        }
        if self.indicators.contains(Indicators::FER) {
            put(33, "FER");
        }
        if self.indicators.contains(Indicators::MACRO) {
            put(50, "MACRO");
        }
        if self.keystate == KeyState::PreHelp {
            put(40, &format!("{:04X}", self.key_src));
        }
        let (y, x) = self.buffer.cursor();
        put(72, &format!("{:03}/{:03}", x + 1, y + 1));
        String::from_utf8_lossy(&line).trim_end().to_string()
    }
}

/// A rendering backend
pub trait Terminal: Send {
    /// Repaint the whole screen.
    fn update(&mut self, view: &ScreenView<'_>) -> TerminalResult<()>;

    /// Repaint only the operator information line.
    fn update_indicators(&mut self, view: &ScreenView<'_>) -> TerminalResult<()> {
        self.update(view)
    }

    fn beep(&mut self);

    /// Whether the terminal supports enhanced 5250 features (GUI constructs).
    fn enhanced(&self) -> bool {
        false
    }

    /// Release the backend. Called exactly once, when the display is torn down.
    fn destroy(&mut self) {}
}

/// Plain-text renderer over any writer
pub struct TextTerminal<W: Write + Send> {
    out: W,
    underscores: bool,
    beeps: usize,
    destroyed: bool,
}

impl<W: Write + Send> TextTerminal<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            underscores: false,
            beeps: 0,
            destroyed: false,
        }
    }

    pub fn with_underscores(mut self, underscores: bool) -> Self {
        self.underscores = underscores;
        self
    }

    pub fn beeps(&self) -> usize {
        self.beeps
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_all(&mut self, text: &str) -> TerminalResult<()> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| TerminalError::DisplayRender { message: e.to_string() })
    }
}

impl<W: Write + Send> Terminal for TextTerminal<W> {
    fn update(&mut self, view: &ScreenView<'_>) -> TerminalResult<()> {
        let text = render_text(view, self.underscores);
        self.write_all(&text)
    }

    fn update_indicators(&mut self, view: &ScreenView<'_>) -> TerminalResult<()> {
        let mut line = view.status_line();
        line.push('\n');
        self.write_all(&line)
    }

    fn beep(&mut self) {
        self.beeps += 1;
        // BEL; a failed write here is not worth surfacing
        let _ = self.out.write_all(b"\x07");
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        let _ = self.out.flush();
    }
}

/// The screen rows followed by the status line, newline terminated
pub fn render_text(view: &ScreenView<'_>, underscores: bool) -> String {
    let mut out = String::with_capacity((view.buffer.width() + 1) * (view.buffer.height() + 1));
    for y in 0..view.buffer.height() {
        out.push_str(view.row_text(y, underscores).trim_end());
        out.push('\n');
    }
    out.push_str(&view.status_line());
    out.push('\n');
    out
}

impl fmt::Display for ScreenView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_text(self, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(buffer: &'a DisplayBuffer, map: &'a CharMap, indicators: Indicators) -> ScreenView<'a> {
        ScreenView {
            buffer,
            indicators,
            keystate: KeyState::Unlocked,
            key_src: 0,
            map,
        }
    }

    #[test]
    fn test_row_text_hides_attributes() {
        let map = CharMap::cp037();
        let mut buf = DisplayBuffer::new(10, 2);
        buf.addch(0x20);
        buf.addch(0xC8);
        buf.addch(0xC9);
        buf.addch(0x24);
        let v = view(&buf, &map, Indicators::empty());
        assert_eq!(v.row_text(0, false), " HI       ");
        assert_eq!(v.row_text(0, true), " HI ______");
    }

    #[test]
    fn test_status_line() {
        let map = CharMap::cp037();
        let mut buf = DisplayBuffer::new(80, 24);
        buf.cursor_set(4, 9);
        let mut inds = Indicators::empty();
        inds.set(Indicators::X_SYSTEM | Indicators::INSERT);
        let line = view(&buf, &map, inds).status_line();
        assert!(line.starts_with("5250     X SYSTEM"));
        assert_eq!(&line[30..32], "IM");
        assert!(line.ends_with("010/005"));

        inds.set(Indicators::MACRO);
        let line = view(&buf, &map, inds).status_line();
        assert_eq!(&line[50..55], "MACRO");
    }

    #[test]
    fn test_text_terminal_renders_and_beeps() {
        let map = CharMap::cp037();
        let mut buf = DisplayBuffer::new(4, 2);
        buf.addch(0xC1);
        let mut term = TextTerminal::new(Vec::new());
        term.update(&view(&buf, &map, Indicators::empty())).unwrap();
        term.beep();
        term.destroy();
        assert_eq!(term.beeps(), 1);
        assert!(term.is_destroyed());
        let out = String::from_utf8(term.into_inner()).unwrap();
        assert!(out.starts_with("A\n\n5250"));
        assert!(out.ends_with('\x07'));
    }
}
