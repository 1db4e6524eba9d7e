use argh::FromArgs;

/// Samples faces from a video into a labelled image dataset
#[derive(FromArgs, Debug)]
pub struct Args {
    /// source: video file, folder of frames, YouTube link or stream URL
    #[argh(option, default = "String::new()")]
    pub source: String,

    /// cascade definition file (SeetaFace model)
    #[argh(option, default = "String::new()")]
    pub cascade: String,

    /// dataset output folder
    #[argh(option, default = "String::from(\"./dataset\")")]
    pub output: String,

    /// milliseconds between two sampled frames
    #[argh(option, default = "5000")]
    pub interval: u64,

    /// frame rate used when the source is a folder of frames
    #[argh(option, default = "30.0")]
    pub fps: f64,

    /// test mode: save every detected face immediately
    #[argh(switch)]
    pub test: bool,

    /// play the source without detecting anything
    #[argh(switch)]
    pub preview: bool,

    /// save unclassified faces under "Others" when playback ends
    #[argh(switch)]
    pub save_all: bool,

    /// list the faces already saved per label and exit without playing
    #[argh(switch)]
    pub resume: bool,

    /// label folder to create before playback (repeatable)
    #[argh(option)]
    pub label: Vec<String>,

    /// move deleted files to this folder instead of the system trash
    #[argh(option)]
    pub holding_folder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_describes_resume_as_review() {
        let help = Args::from_args(&["face-harvest"], &["--help"]).unwrap_err();
        assert!(help.status.is_ok());
        assert!(help.output.contains("--resume"));
        assert!(help.output.contains("exit without playing"));
    }
}
