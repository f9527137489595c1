use crate::dashboard::{format_thousands, CardView, DashboardView};
use crate::errors::CampboardError;
use crate::hotkeys::controls_legend;
use ratatui::backend::TestBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use ratatui::{Frame, Terminal};

const LIVE_DOT: Color = Color::Rgb(0x00, 0xff, 0x88);

/// Renders the dashboard into a plain-text frame of `width` x `height` cells.
pub fn render_dashboard(
    view: &DashboardView,
    width: u16,
    height: u16,
) -> Result<String, CampboardError> {
    Ok(buffer_to_string(&render_buffer(view, width, height)?))
}

/// Renders the dashboard off-screen, keeping per-cell styles.
pub fn render_buffer(
    view: &DashboardView,
    width: u16,
    height: u16,
) -> Result<Buffer, CampboardError> {
    let backend = TestBackend::new(width, height);
    let mut terminal =
        Terminal::new(backend).map_err(|e| CampboardError::Render(e.to_string()))?;
    terminal
        .draw(|frame| draw_dashboard(frame, view))
        .map_err(|e| CampboardError::Render(e.to_string()))?;
    Ok(terminal.backend().buffer().clone())
}

fn buffer_to_string(buffer: &Buffer) -> String {
    let area = buffer.area;
    let mut out = String::new();
    for y in area.top()..area.bottom() {
        for x in area.left()..area.right() {
            out.push_str(buffer[(x, y)].symbol());
        }
        out.push('\n');
    }
    out
}

pub fn draw_dashboard(frame: &mut Frame<'_>, view: &DashboardView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], view);
    if view.is_empty() {
        let loading = Paragraph::new(format!("Loading {} Data...", view.title))
            .alignment(Alignment::Center)
            .style(Style::default().add_modifier(Modifier::BOLD))
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(loading, centered_band(chunks[1], 3));
    } else {
        draw_grid(frame, chunks[1], &view.rows);
    }

    let footer = match &view.notice {
        Some(notice) => Paragraph::new(notice.as_str()).style(Style::default().fg(Color::Yellow)),
        None => Paragraph::new(controls_legend()).style(Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(footer, chunks[2]);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    let block = Block::default().borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(24)])
        .split(inner);
    let title = Paragraph::new(Line::from(vec![
        Span::styled(
            view.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {} items", view.card_count()),
            Style::default().fg(Color::DarkGray),
        ),
    ]));
    frame.render_widget(title, halves[0]);

    let live = Paragraph::new(Line::from(vec![
        Span::styled("● ", Style::default().fg(LIVE_DOT)),
        Span::raw(format!("LIVE • {}", view.clock)),
    ]))
    .alignment(Alignment::Right);
    frame.render_widget(live, halves[1]);
}

fn draw_grid(frame: &mut Frame<'_>, area: Rect, rows: &[Vec<CardView>]) {
    let row_count = rows.len() as u32;
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(rows.iter().map(|_| Constraint::Ratio(1, row_count)))
        .split(area);

    for (row, row_area) in rows.iter().zip(row_areas.iter()) {
        let card_count = row.len() as u32;
        let card_areas = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(row.iter().map(|_| Constraint::Ratio(1, card_count)))
            .split(*row_area);
        for (card, card_area) in row.iter().zip(card_areas.iter()) {
            draw_card(frame, *card_area, card);
        }
    }
}

fn draw_card(frame: &mut Frame<'_>, area: Rect, card: &CardView) {
    let color = card.color.to_color();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let lines = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(centered_band(inner, 5));

    frame.render_widget(
        Paragraph::new(card.name.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().add_modifier(Modifier::BOLD)),
        lines[0],
    );
    frame.render_widget(
        Paragraph::new(format!(
            "{} of {}",
            format_thousands(card.count),
            format_thousands(card.target)
        ))
        .alignment(Alignment::Center),
        lines[1],
    );
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(color).bg(Color::DarkGray))
            .ratio((card.percent / 100.0).clamp(0.0, 1.0))
            .label(""),
        lines[2],
    );
    frame.render_widget(
        Paragraph::new(format!("{:.1}% Complete", card.percent))
            .alignment(Alignment::Center)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
        lines[3],
    );
    frame.render_widget(
        Paragraph::new(card.stage.label().to_uppercase())
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Gray)),
        lines[4],
    );
}

/// Vertically centres a band of `height` rows inside `area`.
fn centered_band(area: Rect, height: u16) -> Rect {
    let height = height.min(area.height);
    let top = area.y + (area.height - height) / 2;
    Rect::new(area.x, top, area.width, height)
}

#[cfg(test)]
mod tests {
    use super::{draw_dashboard, render_buffer, render_dashboard};
    use crate::dashboard::build_view;
    use crate::fetcher::{FetchNotice, FetchOutcome};
    use crate::progress::classify;
    use crate::records::ItemRecord;
    use crate::snapshot::Snapshot;
    use ratatui::backend::CrosstermBackend;
    use ratatui::layout::Rect;
    use ratatui::style::Color;
    use ratatui::{Terminal, TerminalOptions, Viewport};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    fn outcome(items: Vec<ItemRecord>, notice: Option<FetchNotice>) -> FetchOutcome {
        FetchOutcome {
            snapshot: Arc::new(Snapshot::new(items, SystemTime::UNIX_EPOCH)),
            notice,
        }
    }

    fn item(name: &str, count: u64, target: u64) -> ItemRecord {
        ItemRecord {
            code: String::new(),
            name: name.to_string(),
            count,
            target,
        }
    }

    #[test]
    fn card_shows_counts_percent_and_stage() {
        let view = build_view(
            "Working Camp 2025",
            &outcome(vec![item("Tents", 1200, 1500)], None),
            SystemTime::UNIX_EPOCH,
        );
        let frame = render_dashboard(&view, 100, 24).expect("render");
        assert!(frame.contains("Working Camp 2025"));
        assert!(frame.contains("LIVE"));
        assert!(frame.contains("Tents"));
        assert!(frame.contains("1,200 of 1,500"));
        assert!(frame.contains("80.0% Complete"));
        assert!(frame.contains("NEARLY DONE"));
        assert!(frame.contains("Keys: q quit"));
    }

    #[test]
    fn empty_snapshot_shows_loading_panel_and_notice() {
        let view = build_view(
            "Working Camp 2025",
            &outcome(Vec::new(), Some(FetchNotice::Failed("offline".to_string()))),
            SystemTime::UNIX_EPOCH,
        );
        let frame = render_dashboard(&view, 100, 20).expect("render");
        assert!(frame.contains("Loading Working Camp 2025 Data..."));
        assert!(frame.contains("Error loading data: offline"));
    }

    #[test]
    fn tiny_viewports_do_not_panic() {
        let view = build_view(
            "Camp",
            &outcome(vec![item("Rope", 1, 2), item("Water", 3, 4)], None),
            SystemTime::UNIX_EPOCH,
        );
        assert!(render_dashboard(&view, 0, 0).expect("render").is_empty());
        assert!(!render_dashboard(&view, 1, 1).expect("render").is_empty());
    }

    #[test]
    fn every_card_of_a_full_grid_is_drawn() {
        let items = (0..16)
            .map(|idx| item(&format!("Item{idx:02}"), idx, 15))
            .collect();
        let view = build_view("Camp", &outcome(items, None), SystemTime::UNIX_EPOCH);
        let frame = render_dashboard(&view, 160, 48).expect("render");
        for idx in 0..16 {
            assert!(frame.contains(&format!("Item{idx:02}")), "Item{idx:02}");
        }
        assert!(frame.contains("COMPLETED"));
    }

    #[test]
    fn card_borders_and_percent_keep_the_band_colour() {
        let view = build_view(
            "Camp",
            &outcome(vec![item("Tents", 1200, 1500)], None),
            SystemTime::UNIX_EPOCH,
        );
        let buffer = render_buffer(&view, 60, 20).expect("render");
        let (band, _) = classify(80.0);

        // Header takes rows 0..3; the only card starts at the body's top-left.
        assert_eq!(buffer[(0, 3)].symbol(), "┌");
        assert_eq!(buffer[(0, 3)].fg, band.to_color());
        let percent_row = (0..20)
            .find(|&y| {
                (0..60)
                    .map(|x| buffer[(x, y)].symbol())
                    .collect::<String>()
                    .contains("80.0% Complete")
            })
            .expect("percent line");
        let first_digit = (0..60)
            .find(|&x| buffer[(x, percent_row)].symbol() == "8")
            .expect("percent digit");
        assert_eq!(buffer[(first_digit, percent_row)].fg, band.to_color());
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("sink lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn crossterm_frames_carry_the_band_colour_escape() {
        let view = build_view(
            "Camp",
            &outcome(vec![item("Tents", 1200, 1500)], None),
            SystemTime::UNIX_EPOCH,
        );
        let sink = SharedSink::default();
        let mut terminal = Terminal::with_options(
            CrosstermBackend::new(sink.clone()),
            TerminalOptions {
                viewport: Viewport::Fixed(Rect::new(0, 0, 60, 20)),
            },
        )
        .expect("terminal");
        terminal
            .draw(|frame| draw_dashboard(frame, &view))
            .expect("draw");

        let Color::Rgb(r, g, b) = classify(80.0).0.to_color() else {
            panic!("band colours are rgb");
        };
        let written = String::from_utf8_lossy(&sink.0.lock().expect("sink lock")).to_string();
        assert!(
            written.contains(&format!("38;2;{r};{g};{b}")),
            "no foreground escape for the band colour"
        );
        assert!(written.contains("80.0% Complete"));
    }
}
