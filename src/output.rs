use std::io::{self, Write};

use anyhow::{Context as _, Result};
use clap::ValueEnum;
use serde::Serialize;
use tokio::sync::watch;

use crate::sync_engine::state::NowPlayingView;

/// How views are written to stdout
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Waybar custom module JSON
    #[default]
    Waybar,
    /// The full view as JSON
    Json,
}

/// A structure that can be serialized to JSON and parsed by Waybar.
#[derive(Serialize, Debug, Default)]
pub struct WaybarCustomModule {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tooltip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    percentage: Option<usize>,
}

impl WaybarCustomModule {
    /// Create a new module with the given contents.
    pub fn new(
        text: Option<&str>,
        alt: Option<&str>,
        tooltip: Option<&str>,
        class: Option<&str>,
        percentage: Option<usize>,
    ) -> Self {
        Self {
            text: text.map(html_escape::encode_text).map(String::from),
            alt: alt.map(html_escape::encode_text).map(String::from),
            tooltip: tooltip.map(html_escape::encode_text).map(String::from),
            class: class.map(html_escape::encode_text).map(String::from),
            percentage,
        }
    }

    /// Render a now-playing view.
    pub fn from_view(view: &NowPlayingView) -> Self {
        let class = if view.needs_reauth {
            "reauth"
        } else if view.title.is_none() {
            "stopped"
        } else if view.is_playing {
            "playing"
        } else {
            "paused"
        };
        let Some(title) = &view.title else {
            return Self::new(Some("Not playing anything"), Some(class), None, Some(class), None);
        };

        let artists = view.artist_names.join(", ");
        let text = if artists.is_empty() {
            title.clone()
        } else {
            format!("{artists} - {title}")
        };
        let mut tooltip = format!(
            "{text}\n{} / {}",
            format_time(view.estimated_progress_ms),
            format_time(view.duration_ms)
        );
        if let Some(url) = &view.track_url {
            tooltip.push('\n');
            tooltip.push_str(url);
        }
        Self::new(
            Some(&text),
            Some(class),
            Some(&tooltip),
            Some(class),
            Some(view.progress_percent()),
        )
    }

    /// Format the module as JSON and write it to the given writer.
    ///
    /// # Errors
    ///
    /// This function will return an error if writing to the given writer fails.
    pub fn format<T: Write>(&self, mut f: &mut T) -> io::Result<()> {
        serde_json::to_writer(&mut f, self)?;
        f.write_all(b"\n")?;
        Ok(())
    }
}

/// `m:ss`, as shown under the progress bar
#[must_use]
pub fn format_time(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{minutes}:{seconds:02}")
}

impl OutputFormat {
    /// Write one line for `view`.
    ///
    /// # Errors
    ///
    /// This function will return an error if writing to the given writer fails.
    pub fn write<T: Write>(self, view: &NowPlayingView, f: &mut T) -> io::Result<()> {
        match self {
            Self::Waybar => WaybarCustomModule::from_view(view).format(f),
            Self::Json => {
                serde_json::to_writer(&mut *f, view)?;
                f.write_all(b"\n")
            }
        }
    }
}

/// Print every published view until the engine goes away.
///
/// # Errors
///
/// Returns an error if writing to stdout fails.
pub async fn print_views(mut views: watch::Receiver<NowPlayingView>, format: OutputFormat) -> Result<()> {
    loop {
        let view = views.borrow_and_update().clone();
        tracing::trace!(?view, "Printing view");
        let mut stdout = io::stdout().lock();
        format
            .write(&view, &mut stdout)
            .and_then(|()| stdout.flush())
            .context("Failed to write to stdout")?;
        drop(stdout);
        if views.changed().await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::theme::ColorTheme;

    fn render(format: OutputFormat, view: &NowPlayingView) -> String {
        let mut buf = Vec::new();
        format.write(view, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn playing_view() -> NowPlayingView {
        NowPlayingView {
            title: Some("Song & Dance".to_owned()),
            artist_names: vec!["First".to_owned(), "Second".to_owned()],
            track_url: None,
            duration_ms: 200_000,
            estimated_progress_ms: 65_000,
            is_playing: true,
            theme: ColorTheme::NEUTRAL,
            needs_reauth: false,
        }
    }

    #[test]
    fn test_format() {
        let module = WaybarCustomModule {
            text: Some("text".to_owned()),
            alt: Some("alt".to_owned()),
            tooltip: Some("tooltip".to_owned()),
            class: Some("class".to_owned()),
            percentage: Some(50),
        };
        let mut buf = Vec::new();
        module.format(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"text\":\"text\",\"alt\":\"alt\",\"tooltip\":\"tooltip\",\"class\":\"class\",\"percentage\":50}\n"
        );
    }

    #[test]
    fn test_missing_fields() {
        let mut buf = Vec::new();
        WaybarCustomModule::default().format(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{}\n");
    }

    #[test]
    fn test_time_format() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(999), "0:00");
        assert_eq!(format_time(65_000), "1:05");
        assert_eq!(format_time(3_600_000), "60:00");
    }

    #[test]
    fn test_playing_view() {
        assert_eq!(
            render(OutputFormat::Waybar, &playing_view()),
            "{\"text\":\"First, Second - Song &amp; Dance\",\"alt\":\"playing\",\"tooltip\":\"First, Second - Song &amp; Dance\\n1:05 / 3:20\",\"class\":\"playing\",\"percentage\":32}\n"
        );
    }

    #[test]
    fn test_idle_and_reauth_views() {
        assert_eq!(
            render(OutputFormat::Waybar, &NowPlayingView::default()),
            "{\"text\":\"Not playing anything\",\"alt\":\"stopped\",\"class\":\"stopped\"}\n"
        );
        let view = NowPlayingView {
            needs_reauth: true,
            is_playing: false,
            ..playing_view()
        };
        assert!(render(OutputFormat::Waybar, &view).contains("\"class\":\"reauth\""));
    }

    #[test]
    fn test_json_view() {
        let json: serde_json::Value =
            serde_json::from_str(&render(OutputFormat::Json, &playing_view())).unwrap();
        assert_eq!(json["title"], "Song & Dance");
        assert_eq!(json["estimated_progress_ms"], 65_000);
        assert_eq!(json["theme"]["accent"], "#22c55e");
        assert_eq!(json["artist_names"][1], "Second");
    }
}
