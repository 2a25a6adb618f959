//! Rendering of the three tabs. The views are built as plain lines so the
//! adaptive column sizing works on display widths, then drawn through a
//! scrolling paragraph.

use chrono::{DateTime, Utc};
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::app::{App, Tab};
use crate::model::{CallModel, DispatchId, StatusClass};
use crate::text::{display_width, format_duration, left, right, strip_ansi, truncate};

const PENDING_ICON: &str = "•";
const SUCCESS_ICON: &str = "✔";
const FAILURE_ICON: &str = "✗";

const STATUS_COLUMN_WIDTH: usize = 35;
const MIN_FUNCTION_WIDTH: usize = 9;
const MAX_FUNCTION_WIDTH: usize = 50;

const HELP_LOGO: &str = "tab: switch tab • q: quit";
const HELP_FUNCTIONS: &str = "tab: switch tab • s: select • q: quit";
const HELP_LOGS: &str = "tab: switch tab • t: tail • q: quit";
const HELP_DETAIL: &str = "tab: switch tab • esc: back • q: quit";
const HELP_SELECT: &str = "enter: select function • esc: exit select • ctrl+c: quit";

fn gray() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn style_for(class: StatusClass) -> Style {
    match class {
        StatusClass::Pending | StatusClass::Suspended => gray(),
        StatusClass::Retrying => Style::default().fg(Color::Yellow),
        StatusClass::Ok => Style::default().fg(Color::Green),
        StatusClass::Error => Style::default().fg(Color::Red),
    }
}

fn icon_for(class: StatusClass) -> &'static str {
    match class {
        StatusClass::Ok => SUCCESS_ICON,
        StatusClass::Error => FAILURE_ICON,
        _ => PENDING_ICON,
    }
}

pub fn draw(frame: &mut Frame, app: &mut App) {
    let [content_area, status_area, help_area] = Layout::vertical([
        Constraint::Min(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let now = Utc::now();
    let error = app.error.lock().unwrap().clone();

    let (lines, mut status_text, mut help) = {
        let model = app.model.lock().unwrap();
        match app.active_tab {
            Tab::Functions => {
                if model.ordered_roots().is_empty() {
                    app.selected = None;
                    (
                        logo_lines(app.ticks),
                        "Waiting for function calls...".to_string(),
                        HELP_LOGO,
                    )
                } else {
                    let (lines, selected) = functions_lines(
                        &model,
                        now,
                        app.select_mode,
                        app.selection_input.trim(),
                    );
                    app.selected = selected;
                    let total = model.len();
                    let calls = if total == 1 {
                        "1 total function call".to_string()
                    } else {
                        format!("{total} total function calls")
                    };
                    (
                        lines,
                        format!("{calls}, {} in-flight", model.inflight()),
                        HELP_FUNCTIONS,
                    )
                }
            }
            Tab::Logs => (log_lines(app), String::new(), HELP_LOGS),
            Tab::Detail => match app.selected.clone() {
                Some(id) => (detail_lines(&model, &id, now), String::new(), HELP_DETAIL),
                None => (Vec::new(), String::new(), HELP_DETAIL),
            },
        }
    };

    if app.select_mode {
        status_text = format!("Select # {}", app.selection_input);
        help = HELP_SELECT;
    }
    if let Some(error) = error {
        status_text = error;
    }

    // Tail the output unless the user scrolled back.
    let total = lines.len() as u16;
    let max_scroll = total.saturating_sub(content_area.height);
    app.scroll = if app.tail {
        max_scroll
    } else {
        app.scroll.min(max_scroll)
    };
    frame.render_widget(
        Paragraph::new(Text::from(lines)).scroll((app.scroll, 0)),
        content_area,
    );

    let has_error = app.error.lock().unwrap().is_some();
    let status_style = if has_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            format!("  {status_text}"),
            status_style,
        ))),
        status_area,
    );
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(format!("  {help}"), gray()))),
        help_area,
    );
}

// https://patorjk.com/software/taag/ (Ogre)
const DISPATCH_ASCII: [&str; 6] = [
    r"     _ _                 _       _",
    r"  __| (_)___ _ __   __ _| |_ ___| |__",
    r" / _' | / __| '_ \ / _' | __/ __| '_ \",
    r"| (_| | \__ \ |_) | (_| | || (__| | | |",
    r" \__,_|_|___/ .__/ \__,_|\__\___|_| |_|",
    r"            |_|",
];

const UNDERSCORE_ASCII: [&str; 2] = [" _____", "|_____|"];
const UNDERSCORE_INDEX: usize = 3;

fn logo_lines(ticks: u64) -> Vec<Line<'static>> {
    let show_underscore = (ticks / 5) % 2 == 0;
    DISPATCH_ASCII
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut spans = vec![Span::raw(*line)];
            if show_underscore && (UNDERSCORE_INDEX..UNDERSCORE_INDEX + 2).contains(&i) {
                spans.push(Span::styled(
                    UNDERSCORE_ASCII[i - UNDERSCORE_INDEX],
                    Style::default().fg(Color::Green),
                ));
            }
            Line::from(spans)
        })
        .collect()
}

struct Row {
    id: DispatchId,
    prefix: String,
    name: String,
    class: StatusClass,
    attempt: usize,
    duration: Option<std::time::Duration>,
    status: String,
}

fn functions_lines(
    model: &CallModel,
    now: DateTime<Utc>,
    select_mode: bool,
    selection_input: &str,
) -> (Vec<Line<'static>>, Option<DispatchId>) {
    let mut lines = Vec::new();
    let mut selected = None;
    let id_width = model.len().to_string().len();
    let mut index = 0usize;

    for (i, root_id) in model.ordered_roots().iter().enumerate() {
        if i > 0 {
            lines.push(Line::raw(""));
        }

        let mut rows = Vec::new();
        build_rows(model, root_id, now, &mut Vec::new(), &mut rows);

        let function_width = rows
            .iter()
            .map(|row| display_width(&row.prefix) + display_width(&row.name))
            .max()
            .unwrap_or(0)
            .clamp(MIN_FUNCTION_WIDTH, MAX_FUNCTION_WIDTH);

        lines.push(header_line(function_width, select_mode, id_width));
        for row in rows {
            index += 1;
            let row_is_selected =
                select_mode && !selection_input.is_empty() && index.to_string() == selection_input;
            if row_is_selected {
                selected = Some(row.id.clone());
            }
            lines.push(row_line(
                &row,
                function_width,
                select_mode,
                id_width,
                index,
                row_is_selected,
            ));
        }
    }
    lines.push(Line::raw(""));

    (lines, selected)
}

fn build_rows(
    model: &CallModel,
    id: &str,
    now: DateTime<Utc>,
    is_last: &mut Vec<bool>,
    rows: &mut Vec<Row>,
) {
    let Some(call) = model.get(id) else {
        return;
    };

    let mut prefix = String::new();
    for (i, last) in is_last.iter().enumerate() {
        let segment = if i == is_last.len() - 1 {
            if *last {
                "└─"
            } else {
                "├─"
            }
        } else if *last {
            "  "
        } else {
            "│ "
        };
        prefix.push_str(segment);
        prefix.push(' ');
    }

    rows.push(Row {
        id: id.to_string(),
        prefix,
        name: call.function().to_string(),
        class: call.status_class(),
        attempt: call.attempt(),
        duration: call.duration(now),
        status: call.status_text(),
    });

    let children = call.ordered_children.clone();
    for (i, child) in children.iter().enumerate() {
        is_last.push(i == children.len() - 1);
        build_rows(model, child, now, is_last, rows);
        is_last.pop();
    }
}

fn header_line(function_width: usize, select_mode: bool, id_width: usize) -> Line<'static> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let mut spans = Vec::new();
    if select_mode {
        spans.push(Span::raw(left(&"#".repeat(id_width), id_width)));
        spans.push(Span::raw(" "));
    }
    spans.extend([
        Span::styled(left("Function", function_width), bold),
        Span::raw(" "),
        Span::styled(right("Attempt", 8), bold),
        Span::raw(" "),
        Span::styled(right("Duration", 10), bold),
        Span::raw(" "),
        Span::raw(PENDING_ICON),
        Span::raw(" "),
        Span::styled(left("Status", STATUS_COLUMN_WIDTH), bold),
    ]);
    Line::from(spans)
}

fn row_line(
    row: &Row,
    function_width: usize,
    select_mode: bool,
    id_width: usize,
    index: usize,
    is_selected: bool,
) -> Line<'static> {
    let style = style_for(row.class);
    let name_width = function_width.saturating_sub(display_width(&row.prefix));
    let duration = match row.duration {
        Some(d) if !d.is_zero() => format_duration(d),
        _ => "?".to_string(),
    };

    let mut spans = Vec::new();
    if select_mode {
        spans.push(Span::raw(left(&index.to_string(), id_width)));
        spans.push(Span::raw(" "));
    }
    spans.extend([
        Span::styled(row.prefix.clone(), gray()),
        Span::styled(left(&row.name, name_width), style),
        Span::raw(" "),
        Span::raw(right(&row.attempt.to_string(), 8)),
        Span::raw(" "),
        Span::raw(right(&duration, 10)),
        Span::raw(" "),
        Span::styled(icon_for(row.class).to_string(), style),
        Span::raw(" "),
        Span::styled(left(&row.status, STATUS_COLUMN_WIDTH), style),
    ]);

    if is_selected {
        let plain: String = spans.iter().map(|span| span.content.as_ref()).collect();
        Line::from(Span::styled(plain, Style::default().bg(Color::Magenta)))
    } else {
        Line::from(spans)
    }
}

fn log_lines(app: &App) -> Vec<Line<'static>> {
    app.logs
        .snapshot()
        .lines()
        .map(|line| Line::raw(strip_ansi(line)))
        .collect()
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const DETAIL_NAME_WIDTH: usize = 16;

fn detail_line(name: &str, value: Span<'static>) -> Line<'static> {
    Line::from(vec![
        Span::styled(right(&format!("{name}:"), DETAIL_NAME_WIDTH), gray()),
        Span::raw(" "),
        value,
    ])
}

fn local_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&chrono::Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn detail_lines(model: &CallModel, id: &str, now: DateTime<Utc>) -> Vec<Line<'static>> {
    let Some(call) = model.get(id) else {
        return vec![Line::raw("function call not found")];
    };
    let style = style_for(call.status_class());

    let mut lines = vec![
        detail_line("ID", Span::styled(id.to_string(), gray())),
        detail_line("Function", Span::raw(call.function().to_string())),
        detail_line("Status", Span::styled(call.status_text(), style)),
    ];
    if let Some(creation) = call.creation_time {
        lines.push(detail_line(
            "Creation time",
            Span::styled(local_timestamp(creation), gray()),
        ));
    }
    if let Some(expiration) = call.expiration_time {
        if !call.done {
            lines.push(detail_line(
                "Expiration time",
                Span::styled(local_timestamp(expiration), gray()),
            ));
        }
    }
    let duration = match call.duration(now) {
        Some(d) => format_duration(d),
        None => "?".to_string(),
    };
    lines.push(detail_line("Duration", Span::raw(duration)));
    lines.push(detail_line("Attempts", Span::raw(call.attempt().to_string())));
    lines.push(detail_line(
        "Requests",
        Span::raw(call.timeline.len().to_string()),
    ));

    for roundtrip in &call.timeline {
        lines.push(Line::raw(""));
        lines.push(detail_line(
            "Timestamp",
            Span::styled(local_timestamp(roundtrip.request.ts), gray()),
        ));

        match &roundtrip.request.proto.directive {
            Some(dispatch_proto::run_request::Directive::Input(input)) => {
                lines.push(detail_line(
                    "Input",
                    Span::raw(dispatch_proto::any_to_string(Some(input))),
                ));
            }
            Some(dispatch_proto::run_request::Directive::PollResult(poll_result)) => {
                lines.push(detail_line(
                    "Input",
                    Span::styled(
                        format!("<{} bytes of state>", poll_result.coroutine_state.len()),
                        gray(),
                    ),
                ));
            }
            None => {}
        }

        let Some(response) = &roundtrip.response else {
            lines.push(detail_line("Status", Span::raw("Running")));
            continue;
        };

        if let Some(proto) = &response.proto {
            match &proto.directive {
                Some(dispatch_proto::run_response::Directive::Exit(exit)) => {
                    let status = proto.status();
                    let status_style = if status == dispatch_proto::Status::Ok {
                        style_for(StatusClass::Ok)
                    } else if dispatch_proto::terminal_status(status) {
                        style_for(StatusClass::Error)
                    } else {
                        style_for(StatusClass::Retrying)
                    };
                    lines.push(detail_line(
                        "Status",
                        Span::styled(dispatch_proto::status_string(status), status_style),
                    ));

                    if let Some(result) = &exit.result {
                        lines.push(detail_line(
                            "Output",
                            Span::raw(dispatch_proto::any_to_string(result.output.as_ref())),
                        ));
                        if let Some(error) = &result.error {
                            let message = if error.message.is_empty() {
                                error.r#type.clone()
                            } else {
                                format!("{}: {}", error.r#type, error.message)
                            };
                            lines.push(detail_line("Error", Span::styled(message, status_style)));
                        }
                    }
                    if let Some(tail_call) = &exit.tail_call {
                        lines.push(detail_line(
                            "Tail call",
                            Span::raw(tail_call.function.clone()),
                        ));
                    }
                }
                Some(dispatch_proto::run_response::Directive::Poll(poll)) => {
                    lines.push(detail_line(
                        "Status",
                        Span::styled("Suspended", style_for(StatusClass::Suspended)),
                    ));
                    lines.push(detail_line(
                        "Output",
                        Span::styled(
                            format!("<{} bytes of state>", poll.coroutine_state.len()),
                            gray(),
                        ),
                    ));
                    if !poll.calls.is_empty() {
                        let calls = poll
                            .calls
                            .iter()
                            .map(|call| call.function.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        lines.push(detail_line("Calls", Span::raw(truncate(&calls, 50))));
                    }
                }
                None => {}
            }
        } else if let Some(code) = response.http_status {
            lines.push(detail_line(
                "Error",
                Span::styled(format!("HTTP {code}"), style_for(StatusClass::Error)),
            ));
        } else if let Some(error) = &response.error {
            lines.push(detail_line(
                "Error",
                Span::styled(error.clone(), style_for(StatusClass::Error)),
            ));
        }

        let latency = (response.ts - roundtrip.request.ts)
            .to_std()
            .unwrap_or_default();
        lines.push(detail_line("Latency", Span::raw(format_duration(latency))));
    }

    lines
}
