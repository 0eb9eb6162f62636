#![forbid(unsafe_code)]

//! Session orchestration: the glue between a PTY-like byte channel, the
//! terminal engine, an input source, and a render sink.
//!
//! A [`Session`] owns the [`Screen`] behind a single mutex and runs two
//! worker threads:
//!
//! - the **reader** pulls byte chunks from the [`PtyChannel`], feeds them
//!   through the parser into the screen, writes any pending replies back
//!   to the PTY, and marks the screen dirty;
//! - the **renderer** waits for the dirty flag, briefly takes the lock to
//!   snapshot into a pre-allocated [`RenderFrame`], then calls the
//!   [`RenderSink`] outside the lock.
//!
//! Input methods run on the caller's thread and serialize against the PTY
//! reader through the screen lock, so a local state change is always
//! observed by the next snapshot that follows it in lock order.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use tessera_core::screen::ScreenSnapshot;
use tessera_core::{
    encode_focus, encode_key, encode_mouse, encode_paste, Button, CellPosition, KeyCode,
    KeyModifiers, MouseAction, MouseButton, Parser, PixelSize, RenderFrame, Screen, ScreenConfig,
    ScreenEvent, Selection,
};

/// How long [`Session::terminate`] waits for worker threads before
/// detaching them.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read buffer size for the PTY reader loop.
const READ_CHUNK: usize = 64 * 1024;

/// A bidirectional byte channel to the process side (a PTY in production,
/// an in-memory pipe in tests). Process spawning stays outside the core.
///
/// Implementations use interior mutability: reads, writes, and resizes may
/// arrive from different threads.
pub trait PtyChannel: Send + Sync + 'static {
    /// Blocking read of the next chunk. `Ok(0)` means the peer closed.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes toward the application (keyboard input, replies).
    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Propagate a new window size in cells and pixels.
    fn resize(&self, cols: u16, rows: u16, pixels: PixelSize) -> io::Result<()>;

    /// Unblock any pending `read` (subsequent reads return `Ok(0)`).
    fn shutdown(&self);
}

/// Consumer of render frames; called from the render thread.
pub trait RenderSink: Send + 'static {
    fn frame(&mut self, frame: &RenderFrame);
}

/// Errors surfaced by session control operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding: {0}")]
    Snapshot(#[from] serde_json::Error),
}

struct Shared {
    screen: Mutex<Screen>,
    dirty_cv: Condvar,
    running: AtomicBool,
}

impl Shared {
    fn wake_renderer(&self) {
        self.dirty_cv.notify_all();
    }
}

/// A running terminal session.
///
/// Dropping the session terminates it.
pub struct Session {
    shared: Arc<Shared>,
    pty: Arc<dyn PtyChannel>,
    events_rx: mpsc::Receiver<ScreenEvent>,
    reader: Option<(thread::JoinHandle<()>, mpsc::Receiver<()>)>,
    renderer: Option<(thread::JoinHandle<()>, mpsc::Receiver<()>)>,
    cell_pixel_size: PixelSize,
}

impl Session {
    /// Start a session: spawns the reader and renderer threads.
    pub fn spawn(
        config: ScreenConfig,
        pty: Arc<dyn PtyChannel>,
        sink: impl RenderSink,
    ) -> Self {
        let cell_pixel_size = config.cell_pixel_size;
        let shared = Arc::new(Shared {
            screen: Mutex::new(Screen::new(config)),
            dirty_cv: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let (events_tx, events_rx) = mpsc::channel();

        let reader = {
            let shared = shared.clone();
            let pty = pty.clone();
            let (done_tx, done_rx) = mpsc::channel();
            let handle = thread::Builder::new()
                .name("tessera-pty-reader".into())
                .spawn(move || {
                    reader_loop(&shared, &*pty, &events_tx, cell_pixel_size);
                    let _ = done_tx.send(());
                })
                .expect("spawn pty reader thread");
            (handle, done_rx)
        };

        let renderer = {
            let shared = shared.clone();
            let (done_tx, done_rx) = mpsc::channel();
            let mut sink = sink;
            let handle = thread::Builder::new()
                .name("tessera-renderer".into())
                .spawn(move || {
                    render_loop(&shared, &mut sink);
                    let _ = done_tx.send(());
                })
                .expect("spawn renderer thread");
            (handle, done_rx)
        };

        Self {
            shared,
            pty,
            events_rx,
            reader: Some(reader),
            renderer: Some(renderer),
            cell_pixel_size,
        }
    }

    /// Out-of-band screen events (bell, title, application resize
    /// requests already applied to the screen and PTY).
    pub fn events(&self) -> &mpsc::Receiver<ScreenEvent> {
        &self.events_rx
    }

    /// Run `f` under the screen lock (selection control, inspection).
    pub fn with_screen<R>(&self, f: impl FnOnce(&mut Screen) -> R) -> R {
        let mut screen = self.shared.screen.lock();
        f(&mut screen)
    }

    // ── input (serial; serialized against the reader by the lock) ───

    /// Encode and send a key press.
    pub fn key(&self, code: KeyCode, mods: KeyModifiers) -> Result<(), SessionError> {
        let bytes = {
            let screen = self.shared.screen.lock();
            encode_key(code, mods, screen.modes())
        };
        if !bytes.is_empty() {
            self.pty.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Route a mouse event: feeds the DEC locator and, when a mouse
    /// protocol is negotiated, writes the encoded report.
    pub fn mouse(
        &self,
        action: MouseAction,
        button: Option<MouseButton>,
        col: u16,
        row: u16,
        mods: KeyModifiers,
    ) -> Result<(), SessionError> {
        let bytes = {
            let mut screen = self.shared.screen.lock();
            let locator_button = match button {
                None => Button::None,
                Some(MouseButton::Left) => Button::Left,
                Some(MouseButton::Middle) => Button::Middle,
                Some(MouseButton::Right) => Button::Right,
                Some(MouseButton::WheelUp) => Button::WheelUp,
                Some(MouseButton::WheelDown) => Button::WheelDown,
            };
            screen.locator_update(
                locator_button,
                action == MouseAction::Press,
                CellPosition { row, col },
            );
            let mut out = screen.take_replies();
            if let Some(report) = encode_mouse(screen.modes(), action, button, col, row, mods) {
                out.extend_from_slice(&report);
            }
            out
        };
        if !bytes.is_empty() {
            self.pty.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Send pasted text, framed per the bracketed-paste mode.
    pub fn paste(&self, text: &str) -> Result<(), SessionError> {
        let bytes = {
            let screen = self.shared.screen.lock();
            encode_paste(text, screen.modes().bracketed_paste)
        };
        self.pty.write_all(&bytes)?;
        Ok(())
    }

    /// Report a focus change when the application asked for them.
    pub fn focus(&self, gained: bool) -> Result<(), SessionError> {
        let bytes = {
            let screen = self.shared.screen.lock();
            encode_focus(gained, screen.modes())
        };
        if let Some(bytes) = bytes {
            self.pty.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Update the selection and mark the screen for re-render.
    pub fn set_selection(&self, selection: Option<Selection>) {
        let mut screen = self.shared.screen.lock();
        screen.set_selection(selection);
        drop(screen);
        self.shared.wake_renderer();
    }

    /// Extract the currently selected text.
    pub fn selection_text(&self) -> Option<String> {
        self.shared.screen.lock().selection_text()
    }

    /// UI-originated resize: updates the screen, then tells the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        {
            let mut screen = self.shared.screen.lock();
            screen.resize(cols, rows);
        }
        self.shared.wake_renderer();
        let pixels = PixelSize::new(
            cols as u32 * self.cell_pixel_size.width,
            rows as u32 * self.cell_pixel_size.height,
        );
        self.pty.resize(cols, rows, pixels)?;
        Ok(())
    }

    /// Serialize the restorable screen state as an opaque blob.
    pub fn snapshot(&self) -> Result<Vec<u8>, SessionError> {
        let state = self.shared.screen.lock().save_state();
        Ok(serde_json::to_vec(&state)?)
    }

    /// Restore a blob produced by [`Session::snapshot`].
    pub fn restore(&self, blob: &[u8]) -> Result<(), SessionError> {
        let state: ScreenSnapshot = serde_json::from_slice(blob)?;
        let mut screen = self.shared.screen.lock();
        screen.restore_state(state);
        drop(screen);
        self.shared.wake_renderer();
        Ok(())
    }

    /// Stop the session: no new PTY bytes are accepted, blocked readers
    /// are woken, remaining parser state is drained with a synthetic
    /// cancel, and the worker threads are joined within a bounded
    /// timeout (detached past it).
    pub fn terminate(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.pty.shutdown();
        self.shared.wake_renderer();

        for worker in [self.reader.take(), self.renderer.take()].into_iter().flatten() {
            let (handle, done_rx) = worker;
            match done_rx.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(
                        thread = handle.thread().name().unwrap_or("worker"),
                        "worker did not stop in time; detaching"
                    );
                    drop(handle);
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// PTY → parser → screen. Holds the lock only while parsing a chunk.
fn reader_loop(
    shared: &Shared,
    pty: &dyn PtyChannel,
    events: &mpsc::Sender<ScreenEvent>,
    cell_pixel_size: PixelSize,
) {
    let mut parser = Parser::new();
    let mut buf = vec![0u8; READ_CHUNK];

    while shared.running.load(Ordering::SeqCst) {
        let n = match pty.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "pty read failed; terminating session");
                break;
            }
        };

        let replies: Vec<u8>;
        let mut resize_to: Option<(u16, u16)> = None;
        {
            let mut screen = shared.screen.lock();
            parser.feed(&buf[..n], &mut *screen);
            replies = screen.take_replies();
            while let Some(event) = screen.pop_event() {
                if let ScreenEvent::ResizeRequest { cols, rows } = event {
                    screen.resize(cols, rows);
                    resize_to = Some((cols, rows));
                }
                let _ = events.send(event);
            }
        }
        shared.wake_renderer();

        if let Some((cols, rows)) = resize_to {
            let pixels = PixelSize::new(
                cols as u32 * cell_pixel_size.width,
                rows as u32 * cell_pixel_size.height,
            );
            if let Err(e) = pty.resize(cols, rows, pixels) {
                warn!(error = %e, "pty resize failed");
            }
        }
        if !replies.is_empty() {
            if let Err(e) = pty.write_all(&replies) {
                warn!(error = %e, "reply write failed");
            }
        }
    }

    // Drain: a synthetic CAN returns the parser to ground so a partial
    // escape sequence cannot linger in the screen's accumulator.
    {
        let mut screen = shared.screen.lock();
        parser.feed(&[0x18], &mut *screen);
    }
    shared.running.store(false, Ordering::SeqCst);
    shared.wake_renderer();
    debug!("pty reader stopped");
}

/// Dirty-flag driven render loop; snapshots under the lock, draws outside.
fn render_loop(shared: &Shared, sink: &mut dyn RenderSink) {
    let mut frame = RenderFrame::default();
    loop {
        {
            let mut screen = shared.screen.lock();
            while !screen.is_dirty() && shared.running.load(Ordering::SeqCst) {
                shared.dirty_cv.wait(&mut screen);
            }
            if !screen.is_dirty() && !shared.running.load(Ordering::SeqCst) {
                break;
            }
            screen.snapshot_into(&mut frame);
            screen.clear_dirty();
        }
        sink.frame(&frame);
    }
    debug!("renderer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// In-memory bidirectional pipe standing in for a PTY.
    struct TestPty {
        inbound: Mutex<VecDeque<Vec<u8>>>,
        cv: Condvar,
        outbound: Mutex<Vec<u8>>,
        closed: AtomicBool,
        resizes: Mutex<Vec<(u16, u16)>>,
    }

    impl TestPty {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inbound: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
                outbound: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                resizes: Mutex::new(Vec::new()),
            })
        }

        /// Queue bytes for the session's reader thread.
        fn feed(&self, bytes: &[u8]) {
            self.inbound.lock().push_back(bytes.to_vec());
            self.cv.notify_all();
        }

        /// What the session wrote toward the application.
        fn written(&self) -> Vec<u8> {
            self.outbound.lock().clone()
        }
    }

    impl PtyChannel for TestPty {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut queue = self.inbound.lock();
            loop {
                if let Some(chunk) = queue.pop_front() {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        queue.push_front(chunk[n..].to_vec());
                    }
                    return Ok(n);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Ok(0);
                }
                self.cv.wait(&mut queue);
            }
        }

        fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
            self.outbound.lock().extend_from_slice(bytes);
            Ok(())
        }

        fn resize(&self, cols: u16, rows: u16, _pixels: PixelSize) -> io::Result<()> {
            self.resizes.lock().push((cols, rows));
            Ok(())
        }

        fn shutdown(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.cv.notify_all();
        }
    }

    /// Render sink that counts frames and remembers the last one.
    #[derive(Clone)]
    struct TestSink {
        frames: Arc<AtomicUsize>,
        last: Arc<Mutex<RenderFrame>>,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                frames: Arc::new(AtomicUsize::new(0)),
                last: Arc::new(Mutex::new(RenderFrame::default())),
            }
        }
    }

    impl RenderSink for TestSink {
        fn frame(&mut self, frame: &RenderFrame) {
            *self.last.lock() = frame.clone();
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(deadline: Duration, mut ok: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if ok() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        ok()
    }

    fn small_config() -> ScreenConfig {
        ScreenConfig {
            cols: 20,
            rows: 5,
            scrollback_capacity: 100,
            ..ScreenConfig::default()
        }
    }

    #[test]
    fn feeding_bytes_updates_screen_and_renders() {
        let pty = TestPty::new();
        let sink = TestSink::new();
        let mut session = Session::spawn(small_config(), pty.clone(), sink.clone());

        pty.feed(b"hello");
        assert!(wait_until(Duration::from_secs(2), || {
            sink.frames.load(Ordering::SeqCst) > 0
                && sink.last.lock().cells.first().map(|c| c.text.clone())
                    == Some("h".to_string())
        }));

        session.terminate();
    }

    #[test]
    fn replies_flow_back_to_the_pty() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"\x1b[6n");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written() == b"\x1b[1;1R".to_vec()
        }));

        session.terminate();
    }

    #[test]
    fn key_input_honors_modes() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        // Application cursor keys get negotiated by the app...
        pty.feed(b"\x1b[?1h");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| s.modes().application_cursor_keys)
        }));
        // ...and the next arrow press uses SS3.
        session.key(KeyCode::Up, KeyModifiers::empty()).expect("key");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written().ends_with(b"\x1bOA")
        }));

        session.terminate();
    }

    #[test]
    fn mouse_reports_when_negotiated() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"\x1b[?1000h\x1b[?1006h");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| {
                s.modes().mouse_protocol != tessera_core::MouseProtocol::None
            })
        }));
        session
            .mouse(
                MouseAction::Press,
                Some(MouseButton::Left),
                4,
                2,
                KeyModifiers::empty(),
            )
            .expect("mouse");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written().ends_with(b"\x1b[<0;5;3M")
        }));

        session.terminate();
    }

    #[test]
    fn locator_reports_flow_through_mouse_path() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        // DECELR 1 + DECSLE button down.
        pty.feed(b"\x1b[1'z\x1b[1'{");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| {
                s.locator().mode() == tessera_core::ReportingMode::Enabled
            })
        }));
        session
            .mouse(
                MouseAction::Press,
                Some(MouseButton::Left),
                5,
                10,
                KeyModifiers::empty(),
            )
            .expect("mouse");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written().ends_with(b"\x1b[2;1;10;5;1&w")
        }));

        session.terminate();
    }

    #[test]
    fn paste_is_bracketed_when_negotiated() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        session.paste("plain\n").expect("paste");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written() == b"plain\r".to_vec()
        }));

        pty.feed(b"\x1b[?2004h");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| s.modes().bracketed_paste)
        }));
        session.paste("x").expect("paste");
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written().ends_with(b"\x1b[200~x\x1b[201~")
        }));

        session.terminate();
    }

    #[test]
    fn ui_resize_reaches_screen_and_pty() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        session.resize(40, 10).expect("resize");
        assert_eq!(session.with_screen(|s| (s.cols(), s.rows())), (40, 10));
        assert_eq!(pty.resizes.lock().as_slice(), &[(40, 10)]);

        session.terminate();
    }

    #[test]
    fn application_resize_request_round_trips() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"\x1b[8;10;50t");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| (s.cols(), s.rows())) == (50, 10)
        }));
        // The PTY learned the new size and the host got the event.
        assert!(wait_until(Duration::from_secs(2), || {
            pty.resizes.lock().contains(&(50, 10))
        }));
        let event = session.events().recv_timeout(Duration::from_secs(2));
        assert_eq!(
            event.ok(),
            Some(ScreenEvent::ResizeRequest { cols: 50, rows: 10 })
        );

        session.terminate();
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"state\x1b[2;3r");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| s.grid().line(0).map(|l| l.text().trim_end().to_string()))
                == Some("state".to_string())
        }));
        let blob = session.snapshot().expect("snapshot");

        // Wipe, then restore.
        pty.feed(b"\x1bc");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| s.margins().top) == 0
        }));
        session.restore(&blob).expect("restore");
        assert_eq!(
            session.with_screen(|s| s.grid().line(0).map(|l| l.text().trim_end().to_string())),
            Some("state".to_string())
        );
        assert_eq!(session.with_screen(|s| s.margins().top), 1);

        session.terminate();
    }

    #[test]
    fn selection_text_through_session() {
        use tessera_core::{BufferPos, SelectionMode};

        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"grab me");
        assert!(wait_until(Duration::from_secs(2), || {
            session.with_screen(|s| s.grid().cell(0, 0).map(|c| c.content())) == Some('g')
        }));
        session.set_selection(Some(Selection::new(
            BufferPos::new(0, 0),
            BufferPos::new(0, 6),
            SelectionMode::Linear,
        )));
        assert_eq!(session.selection_text().as_deref(), Some("grab me"));

        session.terminate();
    }

    #[test]
    fn terminate_is_idempotent_and_fast() {
        let pty = TestPty::new();
        let mut session = Session::spawn(small_config(), pty.clone(), TestSink::new());
        let start = Instant::now();
        session.terminate();
        session.terminate();
        assert!(start.elapsed() < JOIN_TIMEOUT, "terminate must not hang");
    }

    #[test]
    fn eof_stops_the_reader() {
        let pty = TestPty::new();
        let session = Session::spawn(small_config(), pty.clone(), TestSink::new());

        pty.feed(b"bye");
        pty.shutdown(); // EOF after the queued chunk
        assert!(wait_until(Duration::from_secs(2), || {
            !session.shared.running.load(Ordering::SeqCst)
        }));
        drop(session);
    }

    #[test]
    fn input_is_serialized_against_pty_bytes() {
        // A screen update from local input must be observed by the next
        // snapshot that follows it in lock order.
        let pty = TestPty::new();
        let sink = TestSink::new();
        let mut session = Session::spawn(small_config(), pty.clone(), sink.clone());

        for i in 0..50 {
            pty.feed(format!("line{i}\r\n").as_bytes());
            session.key(KeyCode::Char('x'), KeyModifiers::empty()).expect("key");
        }
        assert!(wait_until(Duration::from_secs(2), || {
            pty.written().len() >= 50
        }));

        session.terminate();
    }
}
