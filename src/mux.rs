//! Multiplexing lines across every file matched by a set of glob patterns.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::reader::{Lines, TailedFile};

/// Ordered, deduplicated set of glob patterns.
///
/// Converts from a single pattern as well as from collections of them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Patterns(Vec<String>);

impl Patterns {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, pattern: String) {
        if !self.0.contains(&pattern) {
            self.0.push(pattern);
        }
    }
}

impl<S: Into<String>> FromIterator<S> for Patterns {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut patterns = Patterns::default();
        for pattern in iter {
            patterns.push(pattern.into());
        }
        patterns
    }
}

impl From<&str> for Patterns {
    fn from(pattern: &str) -> Self {
        Patterns(vec![pattern.to_string()])
    }
}

impl From<String> for Patterns {
    fn from(pattern: String) -> Self {
        Patterns(vec![pattern])
    }
}

impl From<&String> for Patterns {
    fn from(pattern: &String) -> Self {
        Patterns(vec![pattern.clone()])
    }
}

impl<S: Into<String>> From<Vec<S>> for Patterns {
    fn from(patterns: Vec<S>) -> Self {
        patterns.into_iter().collect()
    }
}

impl<S: AsRef<str>> From<&[S]> for Patterns {
    fn from(patterns: &[S]) -> Self {
        patterns.iter().map(|p| p.as_ref().to_string()).collect()
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Patterns {
    fn from(patterns: [S; N]) -> Self {
        patterns.into_iter().collect()
    }
}

/// A line captured from a given source path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Line {
    /// The path from where the line was read.
    source: PathBuf,
    /// Byte offset in the source at which the line starts.
    offset: u64,
    /// The line itself, without its trailing newline.
    line: String,
}

impl Line {
    /// Returns a reference to the file from where the line was read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Returns the byte offset at which the line starts in its file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns a reference to the line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the internal components that make up a `Line`, as
    /// `((source, offset), line)`.
    pub fn into_inner(self) -> ((PathBuf, u64), String) {
        let Line {
            source,
            offset,
            line,
        } = self;

        ((source, offset), line)
    }
}

/// Tails every file matching a set of glob patterns.
///
/// Files appearing later are picked up, files disappearing are dropped, and
/// rotated or truncated files are reopened, all during a periodic rescan of
/// the patterns. Nothing blocks: [`poll`](MultiTail::poll) returns whatever
/// complete lines are available right now.
///
/// ```no_run
/// use multitail::MultiTail;
///
/// let mut tail = MultiTail::new("/var/log/*.log")?;
/// for line in tail.poll(false) {
///     println!("{}:{} {}", line.source().display(), line.offset(), line.line());
/// }
/// # Ok::<(), multitail::Error>(())
/// ```
pub struct MultiTail {
    patterns: Patterns,
    files: HashMap<PathBuf, TailedFile>,
    config: TailConfig,
    last_scan: Option<Instant>,
    /// Consumed the first time the path is opened.
    resume_offsets: HashMap<PathBuf, u64>,
}

impl fmt::Debug for MultiTail {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MultiTail")
            .field("patterns", &self.patterns)
            .field("files", &self.files)
            .field("config", &self.config)
            .field("last_scan", &self.last_scan)
            .finish()
    }
}

impl MultiTail {
    /// Starts tailing `patterns` with the default [`TailConfig`]: files that
    /// already exist are tailed from their current end.
    pub fn new(patterns: impl Into<Patterns>) -> Result<Self> {
        Self::with_config(patterns, TailConfig::default(), HashMap::<PathBuf, u64>::new())
    }

    /// Starts tailing `patterns`, resuming the paths in `resume_offsets` at
    /// the given byte offsets (typically a snapshot taken with
    /// [`offsets`](MultiTail::offsets) by a previous run).
    ///
    /// The initial scan happens before this returns. Fails only for an empty
    /// or malformed pattern set, or an invalid configuration.
    pub fn with_config<I, P>(
        patterns: impl Into<Patterns>,
        config: TailConfig,
        resume_offsets: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (P, u64)>,
        P: Into<PathBuf>,
    {
        let patterns = patterns.into();
        if patterns.is_empty() {
            return Err(Error::NoPatterns);
        }
        for pattern in patterns.iter() {
            glob::Pattern::new(pattern).map_err(|source| Error::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
        }
        config.validate()?;

        let mut tail = MultiTail {
            patterns,
            files: HashMap::new(),
            config,
            last_scan: None,
            resume_offsets: resume_offsets
                .into_iter()
                .map(|(path, offset)| (path.into(), offset))
                .collect(),
        };

        let skip_to_end = tail.config.skip_to_end;
        tail.rescan(skip_to_end);

        Ok(tail)
    }

    pub fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Number of files currently tracked.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(path.as_ref())
    }

    /// Paths currently tracked, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Expands every pattern into a deduplicated list of candidate files.
    fn candidates(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();

        for pattern in self.patterns.iter() {
            let entries = match glob::glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(pattern, error = %e, "failed to expand pattern");
                    continue;
                }
            };

            for entry in entries {
                match entry {
                    Ok(path) if path.is_dir() => {}
                    Ok(path) => {
                        paths.insert(path);
                    }
                    Err(e) => debug!(error = %e, "skipping unreadable match"),
                }
            }
        }

        paths
    }

    /// Checks for new, deleted and rotated files.
    ///
    /// Newly found files start at their end when `skip_to_end` is set, unless
    /// a resume offset was supplied for them. The tracked set is rebuilt
    /// aside and swapped in as a whole.
    pub fn rescan(&mut self, skip_to_end: bool) {
        let candidates = self.candidates();
        let mut previous = std::mem::take(&mut self.files);
        let mut files = HashMap::with_capacity(candidates.len());

        for path in candidates {
            match previous.remove(&path) {
                Some(mut file) => {
                    if file.has_been_rotated() && !file.reopen() {
                        debug!(path = %path.display(), "dropping file that could not be reopened");
                        continue;
                    }
                    files.insert(path, file);
                }
                None => {
                    let resume = self.resume_offsets.get(&path).copied();
                    match TailedFile::open(&path, skip_to_end, resume, &self.config) {
                        Ok(file) => {
                            self.resume_offsets.remove(&path);
                            files.insert(path, file);
                        }
                        // May show up again on a later scan.
                        Err(e) => debug!(error = %e, "skipping file"),
                    }
                }
            }
        }

        for (path, mut file) in previous {
            file.close();
            debug!(path = %path.display(), "no longer matched, dropped");
        }

        trace!(tracked = files.len(), "rescanned");
        self.files = files;
    }

    /// Returns the lines that became available since the last poll, as a
    /// finite, non-blocking iterator.
    ///
    /// Rescans first if `force_rescan` is set or the poll interval elapsed
    /// since the last scan. Files discovered this way are read from their
    /// beginning. Lines are interleaved round-robin, one per file per round,
    /// in no particular file order.
    pub fn poll(&mut self, force_rescan: bool) -> Batch<'_> {
        let due = match self.last_scan {
            Some(last_scan) => last_scan.elapsed() > self.config.poll_interval,
            None => true,
        };
        if force_rescan || due {
            self.rescan(false);
            self.last_scan = Some(Instant::now());
        }

        Batch {
            readers: self
                .files
                .iter_mut()
                .map(|(path, file)| (path.as_path(), file.lines()))
                .collect(),
        }
    }

    /// Polls forever, sleeping for the poll interval whenever a poll comes
    /// back empty. Blocks the current thread.
    pub fn follow(&mut self) -> Follow<'_> {
        Follow {
            tail: self,
            pending: VecDeque::new(),
        }
    }

    /// Snapshot of `(path, offset)` for every tracked file, suitable for
    /// resuming with [`with_config`](MultiTail::with_config).
    pub fn offsets(&self) -> impl Iterator<Item = (&Path, u64)> {
        self.files
            .iter()
            .map(|(path, file)| (path.as_path(), file.offset()))
    }
}

/// Lines produced by a single [`MultiTail::poll`] call.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Batch<'a> {
    readers: VecDeque<(&'a Path, Lines<'a>)>,
}

impl Iterator for Batch<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        while let Some((source, mut lines)) = self.readers.pop_front() {
            if let Some((line, offset)) = lines.next() {
                self.readers.push_back((source, lines));
                return Some(Line {
                    source: source.to_path_buf(),
                    offset,
                    line,
                });
            }
            // Exhausted for this poll.
        }

        None
    }
}

/// Endless iterator over lines, created by [`MultiTail::follow`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Follow<'a> {
    tail: &'a mut MultiTail,
    pending: VecDeque<Line>,
}

impl Iterator for Follow<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }

            self.pending.extend(self.tail.poll(false));
            if self.pending.is_empty() {
                std::thread::sleep(self.tail.config.poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{tempdir, NamedTempFile};

    fn append(path: &Path, data: &str) {
        let mut file = fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    fn collect(tail: &mut MultiTail, force_rescan: bool) -> Vec<((PathBuf, u64), String)> {
        tail.poll(force_rescan).map(Line::into_inner).collect()
    }

    #[test]
    fn test_line_fns() {
        let line = Line {
            source: PathBuf::from("/some/path"),
            offset: 12,
            line: "foo".to_string(),
        };

        assert_eq!(line.source(), Path::new("/some/path"));
        assert_eq!(line.offset(), 12);
        assert_eq!(line.line(), "foo");
        assert_eq!(
            line.into_inner(),
            ((PathBuf::from("/some/path"), 12), "foo".to_string())
        );
    }

    #[test]
    fn test_patterns_conversions() {
        assert_eq!(Patterns::from("a/*.log").len(), 1);
        assert_eq!(Patterns::from(String::from("a")).len(), 1);
        assert_eq!(Patterns::from(vec!["a", "b", "a"]).len(), 2);
        assert_eq!(Patterns::from(["a", "b"]).len(), 2);

        let owned = vec![String::from("x"), String::from("y")];
        let patterns = Patterns::from(owned.as_slice());
        assert_eq!(patterns.iter().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn test_bad_patterns() {
        assert!(matches!(
            MultiTail::new(Vec::<String>::new()),
            Err(Error::NoPatterns)
        ));
        assert!(matches!(
            MultiTail::new("/tmp/[unclosed"),
            Err(Error::Pattern { .. })
        ));
    }

    #[test]
    fn test_bad_config() {
        let config = TailConfig::default().max_buffer_size(0);
        let res = MultiTail::with_config("*.log", config, HashMap::<PathBuf, u64>::new());
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn test_read() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        let mut tail = MultiTail::new(path.to_str().unwrap()).unwrap();

        assert!(collect(&mut tail, false).is_empty());
        assert!(collect(&mut tail, true).is_empty());

        append(&path, "hello\n");
        assert_eq!(
            collect(&mut tail, false),
            vec![((path.clone(), 0), "hello".to_string())]
        );

        append(&path, "world\n");
        assert_eq!(
            collect(&mut tail, false),
            vec![((path.clone(), 6), "world".to_string())]
        );
    }

    #[test]
    fn test_skip_to_end_on_construction() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        append(&path, "history\n");

        let mut tail = MultiTail::new(path.to_str().unwrap()).unwrap();
        assert!(collect(&mut tail, true).is_empty());
        assert_eq!(tail.offsets().collect::<Vec<_>>(), vec![(path.as_path(), 8)]);

        let config = TailConfig::default().skip_to_end(false);
        let mut tail =
            MultiTail::with_config(path.to_str().unwrap(), config, HashMap::<PathBuf, u64>::new())
                .unwrap();
        assert_eq!(
            collect(&mut tail, false),
            vec![((path.clone(), 0), "history".to_string())]
        );
    }

    #[test]
    fn test_offsets_accumulate() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        let mut tail = MultiTail::new(path.to_str().unwrap()).unwrap();

        let lines = ["a", "bb", "", "dddd", "eeeee"];
        for line in &lines {
            append(&path, &format!("{}\n", line));
        }

        let events = collect(&mut tail, false);
        let mut expected = 0;
        for (((source, offset), line), want) in events.iter().zip(lines.iter()) {
            assert_eq!(source, &path);
            assert_eq!(*offset, expected);
            assert_eq!(line, want);
            expected += line.len() as u64 + 1;
        }
        assert_eq!(events.len(), lines.len());
        assert_eq!(tail.offsets().next(), Some((path.as_path(), expected)));
    }

    #[test]
    fn test_read_multiple_files() {
        let temp1 = NamedTempFile::new().unwrap();
        let temp2 = NamedTempFile::new().unwrap();
        let path1 = temp1.path().to_path_buf();
        let path2 = temp2.path().to_path_buf();

        let mut tail = MultiTail::new(vec![path1.to_str().unwrap(), path2.to_str().unwrap()])
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert!(collect(&mut tail, false).is_empty());

        append(&path1, "Some data\n");
        append(&path2, "Some data2\n");

        let mut events = collect(&mut tail, false);
        events.sort();
        let mut expected = vec![
            ((path1.clone(), 0), "Some data".to_string()),
            ((path2.clone(), 0), "Some data2".to_string()),
        ];
        expected.sort();
        assert_eq!(events, expected);
    }

    #[test]
    fn test_round_robin_interleaving() {
        let dir = tempdir().unwrap();
        let busy = dir.path().join("busy.log");
        let quiet = dir.path().join("quiet.log");
        fs::write(&busy, "").unwrap();
        fs::write(&quiet, "").unwrap();

        let pattern = dir.path().join("*.log");
        let mut tail = MultiTail::new(pattern.to_str().unwrap()).unwrap();

        let mut data = String::new();
        for i in 0..100 {
            data.push_str(&format!("busy {}\n", i));
        }
        append(&busy, &data);
        append(&quiet, "quiet 0\nquiet 1\n");

        let events = collect(&mut tail, false);
        assert_eq!(events.len(), 102);

        // Both quiet lines come out within the first two rounds.
        let quiet_positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, ((source, _), _))| source == &quiet)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(quiet_positions.len(), 2);
        assert!(quiet_positions[1] <= 3);
    }

    #[test]
    fn test_duplicate_matches_tailed_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let patterns = vec![
            dir.path().join("*.log").to_str().unwrap().to_string(),
            path.to_str().unwrap().to_string(),
        ];
        let mut tail = MultiTail::new(patterns).unwrap();
        assert_eq!(tail.len(), 1);

        append(&path, "once\n");
        assert_eq!(collect(&mut tail, false).len(), 1);
    }

    #[test]
    fn test_directories_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub.log")).unwrap();
        fs::write(dir.path().join("file.log"), "").unwrap();

        let pattern = dir.path().join("*.log");
        let tail = MultiTail::new(pattern.to_str().unwrap()).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail.contains(dir.path().join("file.log")));
    }

    #[test]
    fn test_new_file_read_from_beginning() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("*.log");
        let config = TailConfig::default().poll_interval(Duration::from_secs(3600));
        let mut tail =
            MultiTail::with_config(pattern.to_str().unwrap(), config, HashMap::<PathBuf, u64>::new())
                .unwrap();
        assert!(tail.is_empty());
        assert!(collect(&mut tail, false).is_empty());

        let path = dir.path().join("late.log");
        fs::write(&path, "early line\n").unwrap();

        // Not due for a rescan yet.
        assert!(collect(&mut tail, false).is_empty());
        assert_eq!(
            collect(&mut tail, true),
            vec![((path.clone(), 0), "early line".to_string())]
        );
    }

    #[test]
    fn test_interval_triggers_rescan() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("*.log");
        let config = TailConfig::default().poll_interval(Duration::from_millis(10));
        let mut tail =
            MultiTail::with_config(pattern.to_str().unwrap(), config, HashMap::<PathBuf, u64>::new())
                .unwrap();
        assert!(collect(&mut tail, false).is_empty());

        let path = dir.path().join("new.log");
        fs::write(&path, "x\n").unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(collect(&mut tail, false), vec![((path, 0), "x".to_string())]);
    }

    #[test]
    fn test_deleted_file_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let pattern = dir.path().join("*.log");
        let mut tail = MultiTail::new(pattern.to_str().unwrap()).unwrap();
        assert!(tail.contains(&path));

        append(&path, "lost\n");
        fs::remove_file(&path).unwrap();
        assert!(collect(&mut tail, true).is_empty());
        assert!(!tail.contains(&path));
        assert!(collect(&mut tail, true).is_empty());

        // A new file at the same path is a different file, read from 0.
        fs::write(&path, "reborn\n").unwrap();
        assert_eq!(
            collect(&mut tail, true),
            vec![((path.clone(), 0), "reborn".to_string())]
        );
    }

    #[test]
    fn test_rotation_flushes_old_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let pattern = dir.path().join("*.log");
        let mut tail = MultiTail::new(pattern.to_str().unwrap()).unwrap();

        append(&path, "one\n");
        assert_eq!(collect(&mut tail, false).len(), 1);

        append(&path, "two\n");
        fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        fs::write(&path, "three\n").unwrap();

        assert_eq!(
            collect(&mut tail, true),
            vec![
                ((path.clone(), 4), "two".to_string()),
                ((path.clone(), 0), "three".to_string()),
            ]
        );
        assert!(!tail.contains(dir.path().join("app.log.1")));
    }

    #[test]
    fn test_resume_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "seen\nunseen\n").unwrap();

        let pattern = dir.path().join("*.log");
        let mut tail = MultiTail::with_config(
            pattern.to_str().unwrap(),
            TailConfig::default(),
            vec![(path.clone(), 5)],
        )
        .unwrap();
        assert_eq!(
            collect(&mut tail, false),
            vec![((path.clone(), 5), "unseen".to_string())]
        );

        let snapshot: HashMap<PathBuf, u64> = tail
            .offsets()
            .map(|(path, offset)| (path.to_path_buf(), offset))
            .collect();
        assert_eq!(snapshot.get(&path), Some(&12));

        // Used once: a recreated file starts over.
        fs::remove_file(&path).unwrap();
        assert!(collect(&mut tail, true).is_empty());
        fs::write(&path, "again\n").unwrap();
        assert_eq!(
            collect(&mut tail, true),
            vec![((path.clone(), 0), "again".to_string())]
        );
    }

    #[test]
    fn test_follow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let pattern = dir.path().join("*.log");
        let config = TailConfig::default().poll_interval(Duration::from_millis(10));
        let mut tail =
            MultiTail::with_config(pattern.to_str().unwrap(), config, HashMap::<PathBuf, u64>::new())
                .unwrap();

        let writer = {
            let path = path.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                append(&path, "a\nb\n");
            })
        };

        let lines: Vec<_> = tail.follow().take(2).map(Line::into_inner).collect();
        writer.join().unwrap();
        assert_eq!(
            lines,
            vec![
                ((path.clone(), 0), "a".to_string()),
                ((path.clone(), 2), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_resume_offset_past_end_replays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "short\n").unwrap();

        let pattern = dir.path().join("*.log");
        let mut tail = MultiTail::with_config(
            pattern.to_str().unwrap(),
            TailConfig::default(),
            vec![(path.clone(), 1000)],
        )
        .unwrap();

        assert_eq!(
            collect(&mut tail, true),
            vec![((path.clone(), 0), "short".to_string())]
        );
    }
}
