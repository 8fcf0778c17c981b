#![doc = include_str!("../README.md")]

use std::{
    fmt::{self, Write as _},
    future::{poll_fn, Future},
    io::{self, Write},
    pin::Pin,
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
    sync::{Arc, OnceLock},
    task::{ready, Context, Poll},
    time::Duration,
};

use futures_core::Stream;
use log::{debug, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

// ============================================================================================== //
// [Prelude module]                                                                               //
// ============================================================================================== //

/// Mass-import for the typewriter types as well as the convenience extension trait.
pub mod prelude {
    pub use crate::{Strategy, Termination, Typewriter, TypewriterExt, TypewriterStream};
}

// ============================================================================================== //
// [General configuration]                                                                        //
// ============================================================================================== //

/// Configuration for a typewriter.
///
/// This is a separate struct from the typewriter itself in order to allow a
/// configuration to be reused across different phrases.
#[derive(Clone)]
pub struct Config {
    /// Pause before each element is produced.
    pub delay: Duration,
    /// Whether elements are produced on demand or by a background task.
    pub strategy: Strategy,
    /// Width available to the theme. `None` asks the terminal.
    pub width: Option<u32>,
    /// Theme to use when typing out a stream.
    pub theme: &'static dyn Theme,
    /// Called exactly once per stream with the reason the stream ended.
    ///
    /// The default value does nothing.
    pub on_finish: &'static (dyn Fn(Termination) + Sync),
}

static DEFAULT_CFG: Config = Config::const_default();

impl Config {
    /// `const` variant of [`Config::default`].
    pub const fn const_default() -> Self {
        Config {
            delay: Duration::from_secs(1),
            strategy: Strategy::Pull,
            width: None,
            theme: &LineTheme,
            on_finish: &|_: Termination| {},
        }
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Config::const_default()
    }
}

/// Selects the currently active global configuration.
///
/// This stores a `*const Config`, for the same reason `AtomicPtr` can't be
/// used: it would require a mutable pointer to a `'static` shared reference.
static GLOBAL_CFG: AtomicUsize = AtomicUsize::new(0);

/// Gets the currently active global configuration.
pub fn global_config() -> &'static Config {
    match GLOBAL_CFG.load(Relaxed) {
        0 => &DEFAULT_CFG,
        ptr => unsafe { &*(ptr as *const Config) },
    }
}

/// Set a new global default configuration.
///
/// This configuration is used when no explicit per instance configuration
/// is specified via [`Typewriter::config`]. Streams already created keep
/// the configuration they were created with.
pub fn set_global_config(new_cfg: &'static Config) {
    GLOBAL_CFG.store(new_cfg as *const _ as _, Relaxed);
}

/// How the elements of a [`TypewriterStream`] are produced.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum Strategy {
    /// Each request from the consumer runs the next production step.
    #[default]
    Pull,
    /// A background task produces every element into an unbounded channel,
    /// independent of how fast the consumer reads.
    Push,
}

// ============================================================================================== //
// [Error types]                                                                                  //
// ============================================================================================== //

/// The delay before an element was cut short by cancellation.
#[derive(Debug, PartialEq, Eq, Copy, Clone, thiserror::Error)]
#[error("delay interrupted before the next element was produced")]
pub struct Interrupted;

/// Errors that can occur while typing out a stream.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Fmt(#[from] fmt::Error),
}

/// Why a stream stopped producing elements.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Termination {
    /// Every grapheme of the phrase was revealed.
    Exhausted,
    /// A delay was cancelled, or the stream was dropped, before the phrase was complete.
    Interrupted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exhausted => f.write_str("done"),
            Termination::Interrupted => f.write_str("interrupted"),
        }
    }
}

// ============================================================================================== //
// [Cursor]                                                                                       //
// ============================================================================================== //

/// Byte offsets at which each grapheme of `phrase` ends.
fn grapheme_ends(phrase: &str) -> Arc<[usize]> {
    phrase
        .grapheme_indices(true)
        .map(|(offs, g)| offs + g.len())
        .collect()
}

/// Position in the phrase. Only ever moves forward.
#[derive(Debug, Clone)]
struct Cursor {
    phrase: Arc<str>,
    ends: Arc<[usize]>,
    pos: usize,
}

impl Cursor {
    fn new(phrase: Arc<str>, ends: Arc<[usize]>) -> Self {
        Self {
            phrase,
            ends,
            pos: 0,
        }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.ends.len() - self.pos
    }

    #[inline]
    fn is_exhausted(&self) -> bool {
        self.pos >= self.ends.len()
    }

    /// Returns the prefix up to and including the grapheme under the cursor, then
    /// moves past it.
    fn advance(&mut self) -> Option<String> {
        let end = *self.ends.get(self.pos)?;
        self.pos += 1;
        Some(self.phrase[..end].to_owned())
    }
}

/// Waits for `delay`, unless `cancel` fires first.
async fn pause(delay: Duration, cancel: CancellationToken) -> Result<(), Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

type Pause = Pin<Box<dyn Future<Output = Result<(), Interrupted>> + Send>>;

type FinishHook = &'static (dyn Fn(Termination) + Sync);

// ============================================================================================== //
// [Pull producer]                                                                                //
// ============================================================================================== //

struct PullProducer {
    cursor: Cursor,
    delay: Duration,
    cancel: CancellationToken,
    /// Delay in flight for the element currently being requested.
    pending: Option<Pause>,
    termination: Option<Termination>,
    on_finish: FinishHook,
}

impl PullProducer {
    fn new(
        cursor: Cursor,
        delay: Duration,
        cancel: CancellationToken,
        on_finish: FinishHook,
    ) -> Self {
        Self {
            cursor,
            delay,
            cancel,
            pending: None,
            termination: None,
            on_finish,
        }
    }

    fn finish(&mut self, termination: Termination) {
        if self.termination.is_some() {
            return;
        }

        debug!("pull typewriter finished: {}", termination);
        self.termination = Some(termination);
        self.pending = None;
        (self.on_finish)(termination);
    }

    fn poll_produce(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
        if self.termination.is_some() {
            return Poll::Ready(None);
        }

        // An empty remainder ends immediately, without waiting.
        if self.cursor.is_exhausted() {
            self.finish(Termination::Exhausted);
            return Poll::Ready(None);
        }

        let delay = self.delay;
        let cancel = &self.cancel;
        let pending = self
            .pending
            .get_or_insert_with(|| Box::pin(pause(delay, cancel.clone())));

        let outcome = ready!(pending.as_mut().poll(cx));
        self.pending = None;

        match outcome {
            Ok(()) => {
                let element = self.cursor.advance();
                trace!("pull typewriter produced {:?}", element);
                if self.cursor.is_exhausted() {
                    self.finish(Termination::Exhausted);
                }
                Poll::Ready(element)
            }
            Err(Interrupted) => {
                self.finish(Termination::Interrupted);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for PullProducer {
    fn drop(&mut self) {
        if self.cursor.is_exhausted() {
            self.finish(Termination::Exhausted);
        } else {
            self.finish(Termination::Interrupted);
        }
    }
}

// ============================================================================================== //
// [Push producer]                                                                                //
// ============================================================================================== //

/// Sending end held by the background task.
///
/// Finishing closes the channel and runs the hook. It happens at most once, and
/// dropping an unfinished handle finishes it as interrupted, so the consumer is
/// released on every exit path of the task.
struct Completion {
    tx: Option<mpsc::UnboundedSender<String>>,
    status: Arc<OnceLock<Termination>>,
    on_finish: FinishHook,
}

impl Completion {
    /// Publishes an element. Returns `false` once the receiving end is gone.
    fn send(&self, element: String) -> bool {
        match &self.tx {
            Some(tx) => tx.send(element).is_ok(),
            None => false,
        }
    }

    fn finish(&mut self, termination: Termination) {
        let Some(tx) = self.tx.take() else {
            return;
        };

        // Status must be visible before the receiver observes the closed channel.
        let _ = self.status.set(termination);
        debug!("push typewriter finished: {}", termination);
        (self.on_finish)(termination);
        drop(tx);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish(Termination::Interrupted);
    }
}

struct PushProducer {
    rx: mpsc::UnboundedReceiver<String>,
    status: Arc<OnceLock<Termination>>,
    remaining: usize,
    /// Whether the channel was observed closed and drained.
    closed: bool,
}

impl PushProducer {
    fn spawn(
        mut cursor: Cursor,
        delay: Duration,
        cancel: CancellationToken,
        on_finish: FinishHook,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(OnceLock::new());
        let remaining = cursor.remaining();

        let mut completion = Completion {
            tx: Some(tx),
            status: Arc::clone(&status),
            on_finish,
        };

        tokio::spawn(async move {
            let termination = loop {
                if cursor.is_exhausted() {
                    break Termination::Exhausted;
                }

                if pause(delay, cancel.clone()).await.is_err() {
                    break Termination::Interrupted;
                }

                let Some(element) = cursor.advance() else {
                    break Termination::Exhausted;
                };

                trace!("push typewriter produced {:?}", element);
                if !completion.send(element) {
                    break Termination::Interrupted;
                }
            };

            completion.finish(termination);
        });

        Self {
            rx,
            status,
            remaining,
            closed: false,
        }
    }

    fn poll_produce(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let element = ready!(self.rx.poll_recv(cx));
        match element {
            Some(_) => self.remaining = self.remaining.saturating_sub(1),
            None => {
                self.closed = true;
                self.remaining = 0;
            }
        }
        Poll::Ready(element)
    }

    /// Held back until the consumer has read every buffered element.
    fn termination(&self) -> Option<Termination> {
        if !self.closed {
            return None;
        }
        self.status.get().copied()
    }
}

enum Producer {
    Pull(PullProducer),
    Push(PushProducer),
}

impl Producer {
    fn poll_produce(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
        match self {
            Producer::Pull(p) => p.poll_produce(cx),
            Producer::Push(p) => p.poll_produce(cx),
        }
    }

    fn termination(&self) -> Option<Termination> {
        match self {
            Producer::Pull(p) => p.termination,
            Producer::Push(p) => p.termination(),
        }
    }

    fn remaining(&self) -> usize {
        match self {
            Producer::Pull(p) if p.termination.is_some() => 0,
            Producer::Pull(p) => p.cursor.remaining(),
            Producer::Push(p) => p.remaining,
        }
    }
}

// ============================================================================================== //
// [Customizable printing]                                                                        //
// ============================================================================================== //

/// Trait defining how elements are rendered by [`TypewriterStream::type_out`].
pub trait Theme: Sync {
    /// Renders a single element.
    fn render(&self, element: &str, width: u32, out: &mut dyn Write) -> Result<(), RenderError>;

    /// Renders the completion notice after the last element.
    fn finish(&self, termination: Termination, out: &mut dyn Write) -> Result<(), RenderError>;
}

/// Prints every element on its own line, followed by the termination reason.
#[derive(Debug, Default)]
pub struct LineTheme;

impl Theme for LineTheme {
    fn render(&self, element: &str, _width: u32, out: &mut dyn Write) -> Result<(), RenderError> {
        writeln!(out, "{}", element)?;
        Ok(())
    }

    fn finish(&self, termination: Termination, out: &mut dyn Write) -> Result<(), RenderError> {
        writeln!(out, "{}", termination)?;
        out.flush().map_err(Into::into)
    }
}

/// Redraws a single line for every element, keeping only the last `width`
/// graphemes in view.
#[derive(Debug, Default)]
pub struct InPlaceTheme;

/// Keeps the last `width` graphemes of `element`.
fn clip(element: &str, width: u32) -> &str {
    let width = width as usize;
    let count = element.graphemes(true).count();
    if count <= width {
        return element;
    }

    match element.grapheme_indices(true).nth(count - width) {
        Some((offs, _)) => &element[offs..],
        None => "",
    }
}

impl Theme for InPlaceTheme {
    fn render(&self, element: &str, width: u32, out: &mut dyn Write) -> Result<(), RenderError> {
        let mut buf = String::new();
        write!(buf, "\r{}", clip(element, width))?;
        out.write_all(buf.as_bytes())?;
        out.flush().map_err(Into::into)
    }

    fn finish(&self, termination: Termination, out: &mut dyn Write) -> Result<(), RenderError> {
        writeln!(out, " [{}]", termination)?;
        out.flush().map_err(Into::into)
    }
}

/// Determines the dimensions of stderr.
#[cfg(feature = "auto-width")]
fn stderr_dimensions() -> (usize, usize) {
    // term_size doesn't support stderr on Windows, so just use stdout.
    #[cfg(target_os = "windows")]
    return term_size::dimensions_stdout().unwrap_or((80, 30));

    #[cfg(not(target_os = "windows"))]
    return term_size::dimensions_stderr().unwrap_or((80, 30));
}

/// Determines the dimensions of stderr.
#[cfg(not(feature = "auto-width"))]
fn stderr_dimensions() -> (usize, usize) {
    (80, 30)
}

// ============================================================================================== //
// [Main typewriter struct]                                                                       //
// ============================================================================================== //

/// A phrase to be revealed one grapheme at a time.
///
/// Every call to [`Typewriter::stream`] starts over at the beginning of the phrase.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use typewriter::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let typewriter = Typewriter::new("Hi").delay(Duration::from_millis(1));
/// let mut stream = typewriter.stream();
/// assert_eq!(stream.next().await.as_deref(), Some("H"));
/// assert_eq!(stream.next().await.as_deref(), Some("Hi"));
/// assert_eq!(stream.next().await, None);
/// # }
/// ```
pub struct Typewriter {
    phrase: Arc<str>,
    /// End offsets of the graphemes in `phrase`.
    ends: Arc<[usize]>,
    /// Configuration to use.
    cfg: Option<&'static Config>,
    /// Overrides `Config::delay`.
    delay: Option<Duration>,
    /// Overrides `Config::strategy`.
    strategy: Option<Strategy>,
    /// Parent of the tokens handed to each stream.
    cancel: CancellationToken,
}

/// Constructors.
impl Typewriter {
    /// Creates a typewriter for the given phrase.
    pub fn new(phrase: impl Into<Arc<str>>) -> Self {
        let phrase = phrase.into();
        let ends = grapheme_ends(&phrase);
        Self {
            phrase,
            ends,
            cfg: None,
            delay: None,
            strategy: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Builder-style methods.
impl Typewriter {
    /// Replace the config of the typewriter.
    ///
    /// Takes precedence over a global config set via [`set_global_config`].
    pub fn config(mut self, cfg: &'static Config) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Set the pause before each element, overriding the config.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set how elements are produced, overriding the config.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Use an existing token to interrupt every stream of this typewriter.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Accessors.
impl Typewriter {
    /// Returns the currently active configuration.
    #[inline]
    pub fn active_config(&self) -> &'static Config {
        self.cfg.unwrap_or_else(global_config)
    }

    #[inline]
    pub fn active_delay(&self) -> Duration {
        self.delay.unwrap_or(self.active_config().delay)
    }

    #[inline]
    pub fn active_strategy(&self) -> Strategy {
        self.strategy.unwrap_or(self.active_config().strategy)
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Number of elements a full run yields, i.e. the number of graphemes.
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Interrupts all streams created from this typewriter, including future ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Creates a new stream starting at the beginning of the phrase.
    ///
    /// # Panics
    ///
    /// With [`Strategy::Push`] the producer is spawned on the current tokio
    /// runtime, so this panics when called outside of one.
    pub fn stream(&self) -> TypewriterStream {
        let cfg = self.active_config();
        let cursor = Cursor::new(Arc::clone(&self.phrase), Arc::clone(&self.ends));
        let cancel = self.cancel.child_token();
        let delay = self.active_delay();
        let strategy = self.active_strategy();

        debug!(
            "starting {:?} typewriter over {} graphemes, {:?} apart",
            strategy,
            self.len(),
            delay
        );

        let producer = match strategy {
            Strategy::Pull => Producer::Pull(PullProducer::new(
                cursor,
                delay,
                cancel.clone(),
                cfg.on_finish,
            )),
            Strategy::Push => Producer::Push(PushProducer::spawn(
                cursor,
                delay,
                cancel.clone(),
                cfg.on_finish,
            )),
        };

        TypewriterStream {
            producer,
            strategy,
            cancel,
            cfg,
            reported: false,
        }
    }
}

// ============================================================================================== //
// [Stream]                                                                                       //
// ============================================================================================== //

/// Single-pass sequence of growing prefixes of a phrase.
///
/// Ends with `None` once the phrase is complete or a delay was interrupted, and
/// keeps returning `None` afterwards. Use [`TypewriterStream::termination`] or
/// [`TypewriterStream::try_next`] to tell the two apart.
pub struct TypewriterStream {
    producer: Producer,
    strategy: Strategy,
    cancel: CancellationToken,
    cfg: &'static Config,
    /// Whether `try_next` already reported an interruption.
    reported: bool,
}

impl TypewriterStream {
    /// Waits for the next element.
    pub async fn next(&mut self) -> Option<String> {
        poll_fn(|cx| self.producer.poll_produce(cx)).await
    }

    /// Like [`TypewriterStream::next`], but an interruption is reported once as an
    /// error instead of a silent end.
    pub async fn try_next(&mut self) -> Result<Option<String>, Interrupted> {
        match self.next().await {
            Some(element) => Ok(Some(element)),
            None if !self.reported && self.termination() == Some(Termination::Interrupted) => {
                self.reported = true;
                Err(Interrupted)
            }
            None => Ok(None),
        }
    }

    /// Why the stream ended, or `None` while elements may still follow.
    ///
    /// A pull stream knows as soon as it yields the last grapheme; a push stream
    /// once the consumer has read every buffered element and seen the end.
    pub fn termination(&self) -> Option<Termination> {
        self.producer.termination()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Token interrupting only this stream.
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Upper bound of the elements still to come.
    pub fn remaining(&self) -> usize {
        self.producer.remaining()
    }

    /// Drives the stream to its end, rendering every element and the completion
    /// notice with the configured theme.
    pub async fn type_out<W: Write>(mut self, mut out: W) -> Result<Termination, RenderError> {
        let theme = self.cfg.theme;
        let width = self
            .cfg
            .width
            .unwrap_or_else(|| stderr_dimensions().0 as u32);

        while let Some(element) = self.next().await {
            theme.render(&element, width, &mut out)?;
        }

        let termination = self.termination().unwrap_or(Termination::Exhausted);
        theme.finish(termination, &mut out)?;
        Ok(termination)
    }
}

impl Stream for TypewriterStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().producer.poll_produce(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl Drop for TypewriterStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================================== //
// [Extension trait]                                                                              //
// ============================================================================================== //

/// Extension trait implemented for everything string-like, adding a method for
/// conveniently creating a typewriter.
///
/// # Example
///
/// ```rust
/// use typewriter::prelude::*;
///
/// let typewriter = "Hello, world!".typewriter();
/// assert_eq!(typewriter.len(), 13);
/// ```
pub trait TypewriterExt {
    fn typewriter(&self) -> Typewriter;
}

impl<T: AsRef<str> + ?Sized> TypewriterExt for T {
    fn typewriter(&self) -> Typewriter {
        Typewriter::new(self.as_ref())
    }
}

// ============================================================================================== //
// [Tests]                                                                                        //
// ============================================================================================== //

#[cfg(doctest)]
mod doctests {
    macro_rules! external_doc_test {
        ($x:expr) => {
            #[doc = $x]
            extern "C" {}
        };
    }

    // Ensure the examples in README.md work.
    external_doc_test!(include_str!("../README.md"));
}
