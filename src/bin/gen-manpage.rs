//! Man page generator for binho
//!
//! Writes `binho.1` plus one `binho-<command>.1` page per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

/// Render the top-level page and one page per subcommand
fn render_pages(cmd: clap::Command) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut pages = Vec::new();
    let name = cmd.get_name().to_string();

    for sub in cmd.get_subcommands().filter(|s| !s.is_hide_set()) {
        let page_name = format!("{}-{}", name, sub.get_name());
        let mut buffer = Vec::new();
        clap_mangen::Man::new(sub.clone())
            .title(page_name.clone())
            .render(&mut buffer)?;
        pages.push((format!("{}.1", page_name), buffer));
    }

    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    pages.insert(0, (format!("{}.1", name), buffer));
    Ok(pages)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let pages = render_pages(cli::Cli::command())?;
    for (file, content) in &pages {
        fs::write(output_dir.join(file), content)?;
    }

    println!(
        "Generated {} man pages in {}",
        pages.len(),
        output_dir.display()
    );
    println!("\nTo view the main page:");
    println!("  man -l {}", output_dir.join("binho.1").display());
    println!("\nTo install for the current user:");
    println!("  mkdir -p ~/.local/share/man/man1");
    println!("  cp {}/binho*.1 ~/.local/share/man/man1/", output_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_page_per_subcommand() {
        let pages = render_pages(cli::Cli::command()).unwrap();
        let names: Vec<&str> = pages.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "binho.1",
                "binho-info.1",
                "binho-gpio.1",
                "binho-spi.1",
                "binho-i2c-scan.1",
                "binho-watch.1"
            ]
        );

        let watch = String::from_utf8_lossy(&pages[5].1);
        assert!(watch.contains("Print interrupts from an IO pin"));
    }
}
