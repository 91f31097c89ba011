//! Progress reporting for long-running operations.
//!
//! Front ends implement [`ProgressCallback`] to show what the flasher is
//! doing. Every long operation is bracketed by [`begin`](ProgressCallback::begin)
//! and [`end`](ProgressCallback::end), and the percentages reported between
//! them never decrease.

/// Receives status and progress while the flasher works.
///
/// All methods have empty default bodies, so implementors only override what
/// they display. Calls come from the thread running the operation and should
/// return promptly.
pub trait ProgressCallback {
    /// A long operation is starting.
    fn begin(&mut self) {}

    /// A one-off status line.
    fn message(&mut self, _text: &str) {}

    /// A phase has started; it is closed by [`message_end`](Self::message_end).
    fn message_begin(&mut self, _text: &str) {}

    /// The phase opened by the last [`message_begin`](Self::message_begin) finished.
    fn message_end(&mut self, _text: &str) {}

    /// Completion of the current operation, 0 to 100.
    fn progress(&mut self, _percent: u8) {}

    /// The operation started by [`begin`](Self::begin) is over.
    fn end(&mut self) {}
}

/// Progress callback that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {}

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// [`ProgressCallback::begin`].
    Begin,
    /// [`ProgressCallback::message`].
    Message(String),
    /// [`ProgressCallback::message_begin`].
    MessageBegin(String),
    /// [`ProgressCallback::message_end`].
    MessageEnd(String),
    /// [`ProgressCallback::progress`].
    Progress(u8),
    /// [`ProgressCallback::end`].
    End,
}

/// Records every callback, for logging front ends and tests.
impl ProgressCallback for Vec<ProgressEvent> {
    fn begin(&mut self) {
        self.push(ProgressEvent::Begin);
    }

    fn message(&mut self, text: &str) {
        self.push(ProgressEvent::Message(text.to_string()));
    }

    fn message_begin(&mut self, text: &str) {
        self.push(ProgressEvent::MessageBegin(text.to_string()));
    }

    fn message_end(&mut self, text: &str) {
        self.push(ProgressEvent::MessageEnd(text.to_string()));
    }

    fn progress(&mut self, percent: u8) {
        self.push(ProgressEvent::Progress(percent));
    }

    fn end(&mut self) {
        self.push(ProgressEvent::End);
    }
}

/// Integer percentage of `done` out of `total`, clamped to 100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = (done as u128 * 100) / total as u128;
    value.min(100) as u8
}

/// Forwards percentages only when they rise, keeping a bracket monotonic.
#[derive(Debug)]
pub(crate) struct PercentReporter {
    last: Option<u8>,
}

impl PercentReporter {
    pub(crate) fn new() -> Self {
        Self { last: None }
    }

    pub(crate) fn report(&mut self, progress: &mut dyn ProgressCallback, value: u8) {
        if self
            .last
            .is_none_or(|last| value > last)
        {
            self.last = Some(value);
            progress.progress(value);
        }
    }
}
