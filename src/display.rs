use colored::*;

use crate::flow::export::legend;

/// Returns the sqlflow ASCII art logo
pub fn get_logo() -> String {
    let logo = r#"
  ███████╗ ██████╗ ██╗     ███████╗██╗      ██████╗ ██╗    ██╗
  ██╔════╝██╔═══██╗██║     ██╔════╝██║     ██╔═══██╗██║    ██║
  ███████╗██║   ██║██║     █████╗  ██║     ██║   ██║██║ █╗ ██║
  ╚════██║██║▄▄ ██║██║     ██╔══╝  ██║     ██║   ██║██║███╗██║
  ███████║╚██████╔╝███████╗██║     ███████╗╚██████╔╝╚███╔███╔╝
  ╚══════╝ ╚══▀▀═╝ ╚══════╝╚═╝     ╚══════╝ ╚═════╝  ╚══╝╚══╝
    "#;

    logo.to_string()
}

/// Returns a colored version of the logo
pub fn get_colored_logo() -> ColoredString {
    get_logo().bright_cyan()
}

/// Display version information with the ASCII art logo
pub fn display_version() {
    println!("{}", get_colored_logo());
    println!("sqlflow version {}", env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Display the node role legend used by every output format
pub fn display_legend() {
    println!("{}", "Node roles".bold());
    print!("{}", legend());
}
