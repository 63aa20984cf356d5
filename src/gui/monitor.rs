use std::{io::stdout, time::Duration};

use crate::buds_reader::ReaderSummary;
use crate::gui::error::GuiError;
use crate::lifecycle::StopSignal;
use crate::quaternion::Quaternion;
use crate::sphericalizer::Direction;

use crossterm::{
    event::{self, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Width of the azimuth strip, in cells.
const COMPASS_WIDTH: usize = 61;

/// What the monitor shows on each redraw.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    /// Where the link goes
    pub link: String,
    /// Latest head orientation
    pub orientation: Quaternion,
    /// Where the virtual source appears
    pub direction: Direction,
    /// Reader counters
    pub reader: ReaderSummary,
}

/// A one-line strip from -180 to 180 degrees with a marker at `azimuth`.
/// Left is positive, so the strip runs from +180 on the left to -180 on
/// the right, as the listener would point.
fn compass(azimuth: f64) -> String {
    let span = (COMPASS_WIDTH - 1) as f64;
    let pos = ((180.0 - azimuth.clamp(-180.0, 180.0)) / 360.0 * span).round() as usize;
    (0..COMPASS_WIDTH)
        .map(|i| match i {
            _ if i == pos => 'O',
            _ if i == COMPASS_WIDTH / 2 => '|',
            _ => '-',
        })
        .collect()
}

fn lines(snapshot: &MonitorSnapshot) -> Vec<Line<'static>> {
    let q = snapshot.orientation;
    let d = snapshot.direction;
    let r = snapshot.reader;
    vec![
        Line::from(vec![" Link ".magenta().bold(), snapshot.link.clone().into()]),
        Line::from(""),
        Line::from(vec![
            " Orientation ".magenta().bold(),
            format!("w {:+.4}  x {:+.4}  y {:+.4}  z {:+.4}", q.w, q.x, q.y, q.z).into(),
        ]),
        Line::from(vec![
            " Source      ".magenta().bold(),
            format!("azimuth {:+7.1}  elevation {:+6.1}", d.azimuth, d.elevation).into(),
        ]),
        Line::from(format!(" L {} R", compass(d.azimuth))),
        Line::from(""),
        Line::from(vec![
            " Link stats  ".magenta().bold(),
            format!(
                "{} bytes  {} samples  {} rejected  {} resyncs",
                r.bytes, r.samples, r.rejected, r.resyncs
            )
            .into(),
        ]),
    ]
}

/// Redraws `snapshot()` until a key is pressed or `stop` is set. A key
/// press sets `stop`.
pub fn monitor_until_stop<F>(stop: &StopSignal, mut snapshot: F) -> Result<(), GuiError>
where
    F: FnMut() -> MonitorSnapshot,
{
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let res = draw_loop(&mut terminal, stop, &mut snapshot);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    res
}

fn draw_loop<B, F>(terminal: &mut Terminal<B>, stop: &StopSignal, snapshot: &mut F) -> Result<(), GuiError>
where
    B: Backend,
    F: FnMut() -> MonitorSnapshot,
{
    while !stop.is_stopped() {
        let title = Title::from(" Head Tracking ".magenta().bold());
        let hint = Title::from(Line::from(vec![" Press any key to stop ".into()]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                hint.alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let text = Paragraph::new(lines(&snapshot())).block(block);
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_widget(text, area);
        })?;
        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    stop.signal_stop();
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn compass_marks_the_source() {
        let ahead = compass(0.0);
        assert_eq!(ahead.len(), COMPASS_WIDTH);
        assert_eq!(ahead.find('O'), Some(COMPASS_WIDTH / 2));
        assert_eq!(compass(180.0).find('O'), Some(0));
        assert_eq!(compass(-180.0).find('O'), Some(COMPASS_WIDTH - 1));
        assert!(compass(90.0).find('O') < compass(-90.0).find('O'));
    }

    #[test]
    fn draws_until_stopped() {
        let mut terminal = Terminal::new(TestBackend::new(80, 12)).unwrap();
        let stop = StopSignal::new();
        let inner = stop.clone();
        let mut frames = 0;
        let mut snapshot = || {
            frames += 1;
            if frames == 3 {
                inner.signal_stop();
            }
            MonitorSnapshot {
                link: "dummy".to_owned(),
                orientation: Quaternion::IDENTITY,
                direction: Direction {
                    azimuth: 12.5,
                    elevation: -3.0,
                },
                reader: ReaderSummary::default(),
            }
        };
        // without a terminal attached, event polling may fail; drawing must not
        let _ = draw_loop(&mut terminal, &stop, &mut snapshot);
        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect();
        assert!(rendered.contains("azimuth   +12.5"));
    }
}
