//! Compositor configuration.

use clap::Parser;

/// Command line options.
#[derive(Parser, Debug)]
#[command(about, version)]
pub struct Cli {
    /// Wayland socket name advertised to clients.
    #[arg(long)]
    pub socket_name: Option<String>,

    /// Window manager client spawned at startup.
    #[arg(long)]
    pub wm: Option<String>,

    /// Xcursor theme exported to clients.
    #[arg(long)]
    pub xcursor_theme: Option<String>,

    /// Xcursor size exported to clients.
    #[arg(long, default_value_t = 24)]
    pub xcursor_size: u32,

    /// Keyboard repeat rate in characters per second.
    #[arg(long, default_value_t = 25)]
    pub repeat_rate: i32,

    /// Keyboard repeat delay in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub repeat_delay: i32,
}

/// Compositor configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub socket_name: String,
    pub wm_command: Option<Vec<String>>,
    pub xcursor_theme: Option<String>,
    pub xcursor_size: u32,
    pub repeat_rate: i32,
    pub repeat_delay: i32,
}

impl Config {
    pub fn new(cli: Cli) -> Self {
        let wm_command = cli
            .wm
            .map(|wm| wm.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|command: &Vec<String>| !command.is_empty());

        Self {
            wm_command,
            socket_name: cli.socket_name.unwrap_or_else(|| String::from("wayland-1")),
            xcursor_theme: cli.xcursor_theme,
            xcursor_size: cli.xcursor_size,
            repeat_rate: cli.repeat_rate,
            repeat_delay: cli.repeat_delay,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_name: String::from("wayland-1"),
            wm_command: None,
            xcursor_theme: None,
            xcursor_size: 24,
            repeat_rate: 25,
            repeat_delay: 200,
        }
    }
}
