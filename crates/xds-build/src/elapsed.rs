/// Renders a duration for the status line: `"12.50 ms"` below one second,
/// `"1.500 seconds"` from one second up.
pub fn format_elapsed(ms: f64) -> String {
    let ms = ms.max(0.0);
    // Unit follows the displayed value: 999.996 prints as 1.000 seconds.
    if (ms * 100.0).round() < 100_000.0 {
        format!("{ms:.2} ms")
    } else {
        format!("{:.3} seconds", ms / 1000.0)
    }
}

pub fn duration_status(ms: f64) -> String {
    format!("Last command duration: {}", format_elapsed(ms))
}
