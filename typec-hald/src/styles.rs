use owo_colors::{OwoColorize, Stream, Style, Styled, SupportsColorsDisplay};

pub fn error_label() -> Style {
    Style::new().bright_red().bold()
}

pub fn error_body() -> Style {
    Style::new().bright_red()
}

pub fn success() -> Style {
    Style::new().green().bold()
}

pub fn tree_opening() -> Style {
    Style::new().bright_green().bold()
}

pub fn property_star() -> Style {
    Style::new().blue().bold()
}

pub fn label() -> Style {
    Style::new().bold()
}

pub fn port_name() -> Style {
    Style::new().yellow().bold()
}

// A role or mode name (e.g. "sink").
pub fn literal() -> Style {
    Style::new().bright_cyan()
}

// Flags, and qualifiers like "(detected)".
pub fn special() -> Style {
    Style::new().magenta()
}

pub fn dim() -> Style {
    Style::new().bright_black()
}

pub trait StyleApply: OwoColorize {
    fn style_if_supported<'a>(
        &'a self,
        stream: Stream,
        style: Style,
    ) -> SupportsColorsDisplay<'a, Self, Styled<&'a Self>, impl Fn(&'a Self) -> Styled<&'a Self>>;
}

impl<T: OwoColorize> StyleApply for T {
    fn style_if_supported<'a>(
        &'a self,
        stream: Stream,
        style: Style,
    ) -> SupportsColorsDisplay<'a, Self, Styled<&'a Self>, impl Fn(&'a Self) -> Styled<&'a Self>>
    {
        self.if_supports_color(stream, move |s| s.style(style))
    }
}
