use anyhow::Result;
use std::process::Command;
use which::which;

pub async fn run() -> Result<()> {
    println!("ytmp3 dependency check\n");

    let mut all_ok = true;

    // Check yt-dlp
    print!("yt-dlp:  ");
    match which("yt-dlp") {
        Ok(path) => {
            let version = Command::new(&path).arg("--version").output();
            match version {
                Ok(out) => {
                    let v = String::from_utf8_lossy(&out.stdout);
                    println!("OK ({})", v.trim());
                }
                Err(_) => {
                    println!("FOUND but failed to get version");
                    all_ok = false;
                }
            }
        }
        Err(_) => {
            println!("NOT FOUND");
            println!("         Install with: brew install yt-dlp");
            println!("         (Debian/Ubuntu: sudo apt-get install yt-dlp)");
            all_ok = false;
        }
    }

    // Check FFmpeg
    print!("ffmpeg:  ");
    match which("ffmpeg") {
        Ok(path) => {
            let version = Command::new(&path).args(["-version"]).output();
            match version {
                Ok(out) => {
                    let first_line = String::from_utf8_lossy(&out.stdout)
                        .lines()
                        .next()
                        .unwrap_or("")
                        .to_string();
                    let version_part = first_line.split_whitespace().nth(2).unwrap_or("unknown");
                    println!("OK ({})", version_part);
                }
                Err(_) => {
                    println!("FOUND but failed to get version");
                    all_ok = false;
                }
            }
        }
        Err(_) => {
            println!("NOT FOUND");
            println!("         Install with: brew install ffmpeg");
            println!("         (Debian/Ubuntu: sudo apt-get install ffmpeg)");
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("All dependencies OK!");
    } else {
        println!("Some dependencies are missing. See above for installation instructions.");
    }

    Ok(())
}
