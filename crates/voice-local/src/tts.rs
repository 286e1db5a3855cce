//! Piper text-to-speech with an on-disk phrase cache
//!
//! Cached phrases are WAV files named by a hash of the voice and the text,
//! played with an aplay-compatible player. Anything else is synthesized on
//! the fly through a `piper --output-raw | aplay` pipe.

use crate::error::{Result, VoiceError};
use crate::interrupt::Interrupt;
use crate::traits::Speaker;
use crate::TtsConfig;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_VOICE_RATE: u32 = 22_050;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Running synthesis/playback processes.
///
/// Dropping the handle kills and reaps anything still running.
pub struct PlaybackHandle {
    children: Vec<(&'static str, Child)>,
    timeout: Duration,
    interrupt: Option<Interrupt>,
}

impl PlaybackHandle {
    /// A handle with nothing left to wait for.
    pub fn finished() -> Self {
        Self {
            children: Vec::new(),
            timeout: Duration::ZERO,
            interrupt: None,
        }
    }

    fn new(children: Vec<(&'static str, Child)>, timeout: Duration, interrupt: Interrupt) -> Self {
        Self {
            children,
            timeout,
            interrupt: Some(interrupt),
        }
    }

    /// True once every process has exited.
    pub fn is_finished(&mut self) -> bool {
        self.children
            .iter_mut()
            .all(|(_, child)| matches!(child.try_wait(), Ok(Some(_))))
    }

    /// Block until playback ends, the timeout passes or an interrupt arrives.
    pub fn wait(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut failure = None;
        while !self.children.is_empty() {
            if self.interrupt.as_ref().is_some_and(Interrupt::is_set) {
                self.cancel();
                return Err(VoiceError::Interrupted);
            }
            let mut i = 0;
            while i < self.children.len() {
                match self.children[i].1.try_wait() {
                    Ok(Some(status)) => {
                        let (name, _) = self.children.remove(i);
                        if !status.success() && failure.is_none() {
                            failure = Some(format!("{name} exited with {status}"));
                        }
                    }
                    Ok(None) => i += 1,
                    Err(e) => {
                        self.cancel();
                        return Err(VoiceError::Io(e));
                    }
                }
            }
            if self.children.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                self.cancel();
                return Err(VoiceError::Timeout("speech output"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        match failure {
            Some(msg) => Err(VoiceError::Playback(msg)),
            None => Ok(()),
        }
    }

    /// Kill and reap every running process.
    pub fn cancel(&mut self) {
        for (name, mut child) in self.children.drain(..) {
            if let Ok(None) = child.try_wait() {
                debug!(process = name, "Killing speech process");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.children.iter().map(|(n, _)| *n).collect();
        f.debug_struct("PlaybackHandle")
            .field("children", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Content-addressed cache key: first 16 hex chars of SHA-256 over
/// `"{voice}:{text}"`.
pub fn cache_key(voice: &str, text: &str) -> String {
    let digest = Sha256::digest(format!("{voice}:{text}").as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(16);
    key
}

/// `<model>.json`, e.g. `en_US-bryce-medium.onnx.json`
pub fn voice_config_path(model: &Path) -> PathBuf {
    let mut path = OsString::from(model.as_os_str());
    path.push(".json");
    PathBuf::from(path)
}

fn read_sample_rate(config_path: &Path) -> u32 {
    let parsed = std::fs::read_to_string(config_path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).map_err(|e| e.to_string()));
    match parsed {
        Ok(v) => v
            .pointer("/audio/sample_rate")
            .and_then(serde_json::Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(DEFAULT_VOICE_RATE),
        Err(e) => {
            warn!(error = %e, "Could not read voice config, using default sample rate");
            DEFAULT_VOICE_RATE
        }
    }
}

/// Piper-backed speaker.
pub struct PiperSpeaker {
    config: TtsConfig,
    voice: String,
    sample_rate: u32,
    interrupt: Interrupt,
}

impl PiperSpeaker {
    /// Verify the voice files and prepare the cache directory.
    ///
    /// A missing model or model config is an unrecoverable startup error.
    pub fn new(config: TtsConfig, interrupt: Interrupt) -> Result<Self> {
        if !config.model_path.is_file() {
            return Err(VoiceError::MissingModel(config.model_path.clone()));
        }
        let json = voice_config_path(&config.model_path);
        if !json.is_file() {
            return Err(VoiceError::MissingModel(json));
        }
        let sample_rate = read_sample_rate(&json);
        let voice = config
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        std::fs::create_dir_all(&config.cache_dir)?;
        info!(%voice, sample_rate, cache = %config.cache_dir.display(), "TTS ready");
        Ok(Self {
            config,
            voice,
            sample_rate,
            interrupt,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn cache_path(&self, text: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.wav", cache_key(&self.voice, text)))
    }

    /// Synthesize every common phrase that is not cached yet.
    ///
    /// Returns how many phrases were synthesized. Per-phrase failures are
    /// logged and skipped.
    pub fn precompute(&mut self) -> Result<usize> {
        let mut made = 0;
        for phrase in self.config.common_phrases.clone() {
            let path = self.cache_path(&phrase);
            if path.is_file() {
                continue;
            }
            debug!(%phrase, "Precomputing phrase");
            match self.synthesize_to_file(&phrase, &path) {
                Ok(()) => made += 1,
                Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
                Err(e) => warn!(%phrase, error = %e, "Phrase synthesis failed"),
            }
        }
        Ok(made)
    }

    fn synthesize_to_file(&self, text: &str, path: &Path) -> Result<()> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut child = Command::new(&self.config.synth_program)
            .arg("--model")
            .arg(&self.config.model_path)
            .arg("--output_file")
            .arg(&partial)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("{}: {e}", self.config.synth_program)))?;
        let mut handle = PlaybackHandle::new(
            vec![("synth", child)],
            Duration::from_secs(self.config.synth_timeout_secs),
            self.interrupt.clone(),
        );
        let result = feed_text(&mut handle.children[0].1, text)
            .and_then(|()| handle.wait())
            .and_then(|()| {
                std::fs::rename(&partial, path)?;
                Ok(())
            });
        if result.is_err() {
            handle.cancel();
            let _ = std::fs::remove_file(&partial);
        }
        result
    }

    fn play_file(&self, path: &Path) -> Result<PlaybackHandle> {
        let child = Command::new(&self.config.player_program)
            .arg("-q")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Playback(format!("{}: {e}", self.config.player_program)))?;
        Ok(PlaybackHandle::new(
            vec![("player", child)],
            Duration::from_secs(self.config.playback_timeout_secs),
            self.interrupt.clone(),
        ))
    }

    fn synthesize_and_play(&self, text: &str) -> Result<PlaybackHandle> {
        let mut synth = Command::new(&self.config.synth_program)
            .arg("--model")
            .arg(&self.config.model_path)
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("{}: {e}", self.config.synth_program)))?;
        let Some(raw) = synth.stdout.take() else {
            let _ = synth.kill();
            let _ = synth.wait();
            return Err(VoiceError::Synthesis("synthesizer stdout unavailable".into()));
        };
        let player = Command::new(&self.config.player_program)
            .args(["-r", &self.sample_rate.to_string(), "-f", "S16_LE", "-t", "raw", "-q"])
            .stdin(Stdio::from(raw))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let player = match player {
            Ok(p) => p,
            Err(e) => {
                let _ = synth.kill();
                let _ = synth.wait();
                return Err(VoiceError::Playback(format!("{}: {e}", self.config.player_program)));
            }
        };
        // Both ends are owned by the handle from here so every exit path reaps them.
        let mut handle = PlaybackHandle::new(
            vec![("synth", synth), ("player", player)],
            Duration::from_secs(self.config.synth_timeout_secs),
            self.interrupt.clone(),
        );
        feed_text(&mut handle.children[0].1, text)?;
        Ok(handle)
    }
}

fn feed_text(child: &mut Child, text: &str) -> Result<()> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| VoiceError::Synthesis("synthesizer stdin unavailable".into()))?;
    stdin
        .write_all(text.as_bytes())
        .and_then(|()| stdin.write_all(b"\n"))
        .map_err(|e| VoiceError::Synthesis(format!("writing text: {e}")))
}

impl Speaker for PiperSpeaker {
    fn speak(&mut self, text: &str) -> Result<()> {
        let outcome = self.speak_async(text).and_then(|mut handle| handle.wait());
        match outcome {
            Ok(()) => Ok(()),
            Err(VoiceError::Interrupted) => Err(VoiceError::Interrupted),
            Err(e) => {
                warn!(%text, error = %e, "Speech output failed");
                Ok(())
            }
        }
    }

    fn speak_async(&mut self, text: &str) -> Result<PlaybackHandle> {
        debug!(%text, "Speaking");
        let cached = self.cache_path(text);
        if cached.is_file() {
            self.play_file(&cached)
        } else {
            self.synthesize_and_play(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_content_addressed() {
        let a = cache_key("en_US-bryce-medium.onnx", "Yes!");
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, cache_key("en_US-bryce-medium.onnx", "Yes!"));
        assert_ne!(a, cache_key("en_US-amy-low.onnx", "Yes!"));
        assert_ne!(a, cache_key("en_US-bryce-medium.onnx", "Done."));
    }

    #[test]
    fn test_voice_config_path() {
        let p = voice_config_path(Path::new("models/piper/en_US-bryce-medium.onnx"));
        assert_eq!(p, PathBuf::from("models/piper/en_US-bryce-medium.onnx.json"));
    }

    #[test]
    fn test_missing_model_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TtsConfig {
            model_path: dir.path().join("nope.onnx"),
            cache_dir: dir.path().join("cache"),
            ..TtsConfig::default()
        };
        assert!(matches!(
            PiperSpeaker::new(config.clone(), Interrupt::new()),
            Err(VoiceError::MissingModel(_))
        ));

        std::fs::write(&config.model_path, b"onnx").unwrap();
        match PiperSpeaker::new(config, Interrupt::new()) {
            Err(VoiceError::MissingModel(p)) => assert!(p.to_string_lossy().ends_with(".onnx.json")),
            _ => panic!("expected the missing voice config to be reported"),
        }
    }

    #[test]
    fn test_reads_voice_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(voice_config_path(&model), br#"{"audio": {"sample_rate": 16000}}"#).unwrap();
        let config = TtsConfig {
            model_path: model,
            cache_dir: dir.path().join("cache"),
            ..TtsConfig::default()
        };
        let speaker = PiperSpeaker::new(config, Interrupt::new()).unwrap();
        assert_eq!(speaker.sample_rate(), 16_000);
        assert_eq!(speaker.voice(), "voice");
        assert!(dir.path().join("cache").is_dir());
        let cached = speaker.cache_path("Yes!");
        assert_eq!(cached.parent(), Some(dir.path().join("cache").as_path()));
    }

    #[test]
    fn test_finished_handle() {
        let mut handle = PlaybackHandle::finished();
        assert!(handle.is_finished());
        assert!(handle.wait().is_ok());
    }

    #[cfg(unix)]
    fn spawn(program: &str, args: &[&str]) -> Child {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_handle_reports_exit_status() {
        let mut ok = PlaybackHandle::new(vec![("true", spawn("true", &[]))], Duration::from_secs(5), Interrupt::new());
        assert!(ok.wait().is_ok());

        let mut bad = PlaybackHandle::new(vec![("false", spawn("false", &[]))], Duration::from_secs(5), Interrupt::new());
        assert!(matches!(bad.wait(), Err(VoiceError::Playback(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_handle_times_out_and_interrupts() {
        let started = Instant::now();
        let mut slow = PlaybackHandle::new(
            vec![("sleep", spawn("sleep", &["5"]))],
            Duration::from_millis(100),
            Interrupt::new(),
        );
        assert!(matches!(slow.wait(), Err(VoiceError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));

        let interrupt = Interrupt::new();
        let mut handle = PlaybackHandle::new(
            vec![("sleep", spawn("sleep", &["5"]))],
            Duration::from_secs(30),
            interrupt.clone(),
        );
        interrupt.trigger();
        assert!(matches!(handle.wait(), Err(VoiceError::Interrupted)));
        assert!(handle.is_finished());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_synthesizer_closing_stdin_is_reaped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("synth.pid");
        let synth = dir.path().join("fake-piper");
        std::fs::write(
            &synth,
            format!("#!/bin/sh
echo $$ > '{}'
exec 0<&-
exec sleep 30
", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&synth, std::fs::Permissions::from_mode(0o755)).unwrap();

        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(voice_config_path(&model), b"{}").unwrap();
        let config = TtsConfig {
            model_path: model,
            cache_dir: dir.path().join("cache"),
            synth_program: synth.to_string_lossy().into_owned(),
            synth_timeout_secs: 2,
            ..TtsConfig::default()
        };
        let speaker = PiperSpeaker::new(config, Interrupt::new()).unwrap();

        // Larger than a pipe buffer, so the write fails once stdin is closed.
        let text = "a".repeat(256 * 1024);
        let target = dir.path().join("out.wav");
        let started = Instant::now();
        assert!(speaker.synthesize_to_file(&text, &target).is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!target.exists());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "synthesizer {} still present", pid.trim());
    }

    #[cfg(unix)]
    #[test]
    fn test_precompute_and_cached_playback() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("player.log");
        let synth = dir.path().join("fake-piper");
        let player = dir.path().join("fake-aplay");
        // --model M --output_file P: write stdin to P; --output-raw: echo to stdout
        std::fs::write(
            &synth,
            "#!/bin/sh\nif [ \"$3\" = \"--output_file\" ]; then cat > \"$4\"; else cat; fi\n",
        )
        .unwrap();
        std::fs::write(
            &player,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\ncat > /dev/null\n", log.display()),
        )
        .unwrap();
        for script in [&synth, &player] {
            std::fs::set_permissions(script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(voice_config_path(&model), b"{}").unwrap();
        let config = TtsConfig {
            model_path: model,
            cache_dir: dir.path().join("cache"),
            synth_program: synth.to_string_lossy().into_owned(),
            player_program: player.to_string_lossy().into_owned(),
            common_phrases: vec!["Yes!".into(), "Done.".into()],
            ..TtsConfig::default()
        };
        let mut speaker = PiperSpeaker::new(config, Interrupt::new()).unwrap();
        assert_eq!(speaker.sample_rate(), 22_050);

        assert_eq!(speaker.precompute().unwrap(), 2);
        assert_eq!(speaker.precompute().unwrap(), 0);
        let cached = speaker.cache_path("Yes!");
        assert_eq!(std::fs::read_to_string(&cached).unwrap(), "Yes!\n");

        speaker.speak("Yes!").unwrap();
        speaker.speak("Logged 500 calories.").unwrap();
        assert!(!speaker.cache_path("Logged 500 calories.").exists());

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("-q ") && lines[0].ends_with(".wav"));
        assert_eq!(lines[1], "-r 22050 -f S16_LE -t raw -q");
    }
}
