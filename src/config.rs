use crate::cli::Args;
use crate::store::DatasetMode;

/// Default milliseconds between two detection samples
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 5000;

/// Operator-editable pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Video file, frame folder, YouTube link or stream URL
    pub video_path: String,
    /// Cascade definition file
    pub cascade_path: String,
    /// Dataset root folder
    pub output_dir: String,
    pub capture_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            video_path: String::new(),
            cascade_path: String::new(),
            output_dir: String::new(),
            capture_interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
        }
    }
}

/// Which of the two dataset flows are switched on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFlags {
    pub learning: bool,
    pub test: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            learning: true,
            test: false,
        }
    }
}

impl ModeFlags {
    /// Playback-only when neither flow is on
    pub fn detection_enabled(&self) -> bool {
        self.learning || self.test
    }

    /// Dataset subtree that sampled faces go to; learning wins when both are on
    pub fn dataset_mode(&self) -> Option<DatasetMode> {
        if self.learning {
            Some(DatasetMode::Learning)
        } else if self.test {
            Some(DatasetMode::Test)
        } else {
            None
        }
    }

    /// Subtree used by classification and label operations
    pub fn output_mode(&self) -> DatasetMode {
        self.dataset_mode().unwrap_or(DatasetMode::Test)
    }
}

/// Builds pipeline settings from command line arguments
pub fn build_settings(args: &Args) -> Settings {
    Settings {
        video_path: args.source.trim().to_string(),
        cascade_path: args.cascade.trim().to_string(),
        output_dir: args.output.trim().to_string(),
        capture_interval_ms: args.interval,
    }
}

/// Maps the `--test` / `--preview` switches onto mode flags
pub fn build_mode_flags(args: &Args) -> ModeFlags {
    if args.preview {
        ModeFlags {
            learning: false,
            test: false,
        }
    } else if args.test {
        ModeFlags {
            learning: false,
            test: true,
        }
    } else {
        ModeFlags::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["face-harvest"], args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        let settings = build_settings(&args);
        assert_eq!(settings.capture_interval_ms, DEFAULT_CAPTURE_INTERVAL_MS);
        assert_eq!(settings.output_dir, "./dataset");
        assert_eq!(build_mode_flags(&args), ModeFlags::default());
    }

    #[test]
    fn test_settings_from_args() {
        let args = parse(&[
            "--source", " clip.mp4 ",
            "--cascade", "seeta.bin",
            "--output", "out",
            "--interval", "250",
            "--label", "cat",
            "--label", "dog",
        ]);
        assert_eq!(
            build_settings(&args),
            Settings {
                video_path: "clip.mp4".to_string(),
                cascade_path: "seeta.bin".to_string(),
                output_dir: "out".to_string(),
                capture_interval_ms: 250,
            }
        );
        assert_eq!(args.label, vec!["cat", "dog"]);
    }

    #[test]
    fn test_mode_switches() {
        let test = build_mode_flags(&parse(&["--test"]));
        assert!(!test.learning && test.test);

        // Preview wins over test
        let preview = build_mode_flags(&parse(&["--test", "--preview"]));
        assert!(!preview.learning && !preview.test);
        assert!(!preview.detection_enabled());
        assert_eq!(preview.dataset_mode(), None);

        let both = ModeFlags {
            learning: true,
            test: true,
        };
        assert_eq!(both.dataset_mode(), Some(DatasetMode::Learning));
        assert_eq!(test.output_mode(), DatasetMode::Test);
    }
}
