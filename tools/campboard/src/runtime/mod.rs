use crate::dashboard::DashboardView;
use crate::errors::CampboardError;
use crate::sheets::{GoogleSheetsSource, SheetRequest, SheetRow, SourceError};
use crate::tui::{draw_dashboard, render_dashboard};
use ratatui::backend::CrosstermBackend;
use std::collections::{HashMap, VecDeque};
use std::io::{BufWriter, Read, Stdout, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    /// The child is killed once this elapses.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CampboardError>;
}

pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CampboardError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, CampboardError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn is_interactive(&self) -> bool;
    fn begin_session(&self) -> Result<(), CampboardError>;
    fn end_session(&self) -> Result<(), CampboardError>;
    fn write_line(&self, line: &str) -> Result<(), CampboardError>;
    fn draw(&self, view: &DashboardView) -> Result<(), CampboardError>;
    /// Waits up to `timeout` for a key press.
    fn poll_key(&self, timeout: Duration) -> Result<Option<char>, CampboardError>;
}

/// The remote tabular store the dashboard reads from.
pub trait SheetSource: Send + Sync {
    fn fetch_records(&self, request: &SheetRequest) -> Result<Vec<SheetRow>, SourceError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CampboardError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CampboardError> {
        std::fs::read_to_string(path)
            .map_err(|e| CampboardError::Io(format!("{}: {e}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CampboardError> {
        let mut child = std::process::Command::new(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CampboardError::Process(format!("{}: {e}", request.program)))?;
        // Drain both pipes off-thread so a chatty child cannot block on a full pipe.
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = match request.timeout {
            None => child
                .wait()
                .map_err(|e| CampboardError::Process(format!("{}: {e}", request.program)))?,
            Some(timeout) => wait_with_deadline(&mut child, Instant::now() + timeout)
                .map_err(|e| CampboardError::Process(format!("{}: {e}", request.program)))?
                .ok_or_else(|| {
                    CampboardError::Timeout(format!(
                        "{} did not finish within {}ms",
                        request.program,
                        timeout.as_millis()
                    ))
                })?,
        };

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: collect_output(stdout),
            stderr: collect_output(stderr),
        })
    }
}

/// Polls the child until it exits or `deadline` passes; a late child is killed.
fn wait_with_deadline(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            String::from_utf8_lossy(&bytes).to_string()
        })
    })
}

fn collect_output(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

type Screen = ratatui::Terminal<CrosstermBackend<BufWriter<Stdout>>>;

/// Full-screen terminal. Frames are drawn through ratatui's crossterm backend
/// so cell colours reach the user.
#[derive(Default)]
pub struct ProductionTerminal {
    screen: Mutex<Option<Screen>>,
}

fn open_screen() -> Result<Screen, CampboardError> {
    Screen::new(CrosstermBackend::new(BufWriter::new(std::io::stdout())))
        .map_err(|e| CampboardError::Render(e.to_string()))
}

impl ProductionTerminal {
    fn lock_screen(&self) -> Result<std::sync::MutexGuard<'_, Option<Screen>>, CampboardError> {
        self.screen
            .lock()
            .map_err(|_| CampboardError::Render("terminal lock poisoned".to_string()))
    }
}

impl Terminal for ProductionTerminal {
    fn is_interactive(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
            && std::io::IsTerminal::is_terminal(&std::io::stdout())
    }

    fn begin_session(&self) -> Result<(), CampboardError> {
        if !self.is_interactive() {
            return Ok(());
        }
        crossterm::terminal::enable_raw_mode().map_err(|e| CampboardError::Io(e.to_string()))?;
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::EnterAlternateScreen,
            crossterm::cursor::Hide
        )
        .map_err(|e| CampboardError::Io(e.to_string()))?;
        *self.lock_screen()? = Some(open_screen()?);
        Ok(())
    }

    fn end_session(&self) -> Result<(), CampboardError> {
        if !self.is_interactive() {
            return Ok(());
        }
        self.lock_screen()?.take();
        crossterm::execute!(
            std::io::stdout(),
            crossterm::cursor::Show,
            crossterm::terminal::LeaveAlternateScreen
        )
        .map_err(|e| CampboardError::Io(e.to_string()))?;
        crossterm::terminal::disable_raw_mode().map_err(|e| CampboardError::Io(e.to_string()))
    }

    fn write_line(&self, line: &str) -> Result<(), CampboardError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| CampboardError::Io(e.to_string()))
    }

    fn draw(&self, view: &DashboardView) -> Result<(), CampboardError> {
        let mut guard = self.lock_screen()?;
        if guard.is_none() {
            *guard = Some(open_screen()?);
        }
        if let Some(screen) = guard.as_mut() {
            screen
                .draw(|frame| draw_dashboard(frame, view))
                .map_err(|e| CampboardError::Render(e.to_string()))?;
        }
        Ok(())
    }

    fn poll_key(&self, timeout: Duration) -> Result<Option<char>, CampboardError> {
        use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

        if !event::poll(timeout).map_err(|e| CampboardError::Io(e.to_string()))? {
            return Ok(None);
        }
        match event::read().map_err(|e| CampboardError::Io(e.to_string()))? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    Ok(Some('q'))
                }
                KeyCode::Char(c) => Ok(Some(c)),
                KeyCode::Esc => Ok(Some('q')),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
    pub sheet_source: Arc<dyn SheetSource>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(ProductionClock);
        let file_system: Arc<dyn FileSystem> = Arc::new(ProductionFileSystem);
        let process_runner: Arc<dyn ProcessRunner> = Arc::new(ProductionProcessRunner);
        let sheet_source = Arc::new(GoogleSheetsSource::new(
            clock.clone(),
            file_system.clone(),
            process_runner.clone(),
        ));
        Self {
            clock,
            file_system,
            process_runner,
            terminal: Arc::new(ProductionTerminal::default()),
            sheet_source,
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CampboardError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        let mut now = self.now.lock().expect("clock lock");
        if deadline > *now {
            *now = deadline;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    reads: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.insert(path, contents);
        fs
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &Path) {
        self.files.lock().expect("files lock").remove(path);
    }

    pub fn reads(&self) -> Vec<PathBuf> {
        self.reads.lock().expect("reads lock").clone()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CampboardError> {
        self.reads
            .lock()
            .expect("reads lock")
            .push(path.to_path_buf());
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| CampboardError::Io(format!("missing file {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub interactive: bool,
    pub dimensions: (u16, u16),
    writes: Arc<Mutex<Vec<String>>>,
    draws: Arc<Mutex<Vec<String>>>,
    keys: Arc<Mutex<VecDeque<char>>>,
    sessions: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeTerminal {
    pub fn new(interactive: bool) -> Self {
        Self {
            interactive,
            dimensions: (120, 30),
            ..Self::default()
        }
    }

    pub fn push_key(&self, key: char) {
        self.keys.lock().expect("keys lock").push_back(key);
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        self.draws.lock().expect("draw lock").clone()
    }

    pub fn session_events(&self) -> Vec<&'static str> {
        self.sessions.lock().expect("sessions lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn begin_session(&self) -> Result<(), CampboardError> {
        self.sessions.lock().expect("sessions lock").push("begin");
        Ok(())
    }

    fn end_session(&self) -> Result<(), CampboardError> {
        self.sessions.lock().expect("sessions lock").push("end");
        Ok(())
    }

    fn write_line(&self, line: &str) -> Result<(), CampboardError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }

    fn draw(&self, view: &DashboardView) -> Result<(), CampboardError> {
        let (width, height) = self.dimensions;
        let frame = render_dashboard(view, width, height)?;
        self.draws.lock().expect("draw lock").push(frame);
        Ok(())
    }

    fn poll_key(&self, _timeout: Duration) -> Result<Option<char>, CampboardError> {
        Ok(self.keys.lock().expect("keys lock").pop_front())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, CampboardError>>>>,
    requests: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, CampboardError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CampboardError> {
        self.requests.lock().expect("requests lock").push(request);
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(CampboardError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }
}

#[derive(Default, Clone)]
pub struct FakeSheetSource {
    responses: Arc<Mutex<VecDeque<Result<Vec<SheetRow>, SourceError>>>>,
    requests: Arc<Mutex<Vec<SheetRequest>>>,
}

impl FakeSheetSource {
    pub fn push_response(&self, response: Result<Vec<SheetRow>, SourceError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<SheetRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl SheetSource for FakeSheetSource {
    fn fetch_records(&self, request: &SheetRequest) -> Result<Vec<SheetRow>, SourceError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::from_message("no fake response queued")))
    }
}
