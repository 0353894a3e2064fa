//! Desktop automation with the platform's own command-line tools.
//!
//! - macOS: `open`, `osascript`, `killall`
//! - Linux (X11): `xdg-open`, `wmctrl`, `xdotool`, `pgrep`/`pkill`
//! - Windows: `cmd /C start`, `tasklist`, PowerShell, `taskkill`
//!
//! Scripts are generated from [`CloseAction`]; there are no per-application
//! script templates. Every child is spawned with `kill_on_drop`, so a request
//! deadline that drops the future also stops the child.

use super::{AutomationBackend, CloseAction};
use crate::config::AutomationConfig;
use crate::error::{AutoFileError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

pub struct SystemAutomation {
    command_timeout: Duration,
}

impl SystemAutomation {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            command_timeout: config.action_timeout(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        match tokio::time::timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    tracing::debug!(
                        "{} 退出码 {:?}: {}",
                        program,
                        output.status.code(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(output)
            }
            Ok(Err(e)) => Err(AutoFileError::AutomationFailure(format!(
                "failed to run {}: {}",
                program, e
            ))),
            Err(_) => Err(AutoFileError::AutomationFailure(format!(
                "{} did not finish within {}ms",
                program,
                self.command_timeout.as_millis()
            ))),
        }
    }

    /// 命令成功执行且退出码为 0
    async fn run_ok(&self, program: &str, args: &[&str]) -> bool {
        match self.run(program, args).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }
}

#[cfg(target_os = "macos")]
#[async_trait]
impl AutomationBackend for SystemAutomation {
    fn name(&self) -> &str {
        "macos"
    }

    async fn launch_default(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let output = self.run("open", &[&*path]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure(format!(
                "open failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn query_windows_by_title(&self, needle: &str) -> Result<Vec<String>> {
        let script = macos::window_owners_script(needle);
        let output = self.run("osascript", &["-e", &script]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure(format!(
                "window query failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(macos::parse_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn process_running(&self, process: &str) -> Result<bool> {
        let script = macos::process_exists_script(process);
        let output = self.run("osascript", &["-e", &script]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn run_app_action(&self, app: &str, action: CloseAction, title: &str) -> bool {
        let Some(script) = macos::action_script(app, action, title) else {
            return self.terminate(app).await;
        };
        self.run_ok("osascript", &["-e", &script]).await
    }

    async fn terminate(&self, process: &str) -> bool {
        self.run_ok("killall", &[process]).await
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
#[async_trait]
impl AutomationBackend for SystemAutomation {
    fn name(&self) -> &str {
        "linux"
    }

    async fn launch_default(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let output = self.run("xdg-open", &[&*path]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure(format!(
                "xdg-open failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn query_windows_by_title(&self, needle: &str) -> Result<Vec<String>> {
        let output = self.run("wmctrl", &["-lp"]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure("wmctrl -lp failed".into()));
        }

        let mut owners = Vec::new();
        for window in linux::parse_wmctrl(&String::from_utf8_lossy(&output.stdout)) {
            if !window.title.contains(needle) {
                continue;
            }
            // pid 为 0 表示窗口管理器不知道所属进程
            let owner = match tokio::fs::read_to_string(format!("/proc/{}/comm", window.pid)).await {
                Ok(comm) if window.pid != 0 => comm.trim().to_string(),
                _ => continue,
            };
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
        Ok(owners)
    }

    async fn process_running(&self, process: &str) -> Result<bool> {
        let output = self.run("pgrep", &["-x", process]).await?;
        Ok(output.status.success())
    }

    async fn run_app_action(&self, app: &str, action: CloseAction, title: &str) -> bool {
        let pattern = regex::escape(title);
        match action {
            CloseAction::GracefulCloseByTitle => self.close_windows_by_title(title).await,
            CloseAction::KeystrokeClose => {
                self.run_ok(
                    "xdotool",
                    &["search", "--name", &pattern, "windowactivate", "--sync", "key", "ctrl+w"],
                )
                .await
            }
            CloseAction::SaveAndQuit => {
                self.run_ok(
                    "xdotool",
                    &[
                        "search", "--name", &pattern, "windowactivate", "--sync", "key", "ctrl+s",
                        "sleep", "0.5", "key", "ctrl+q",
                    ],
                )
                .await
            }
            CloseAction::ForceQuit => self.terminate(app).await,
        }
    }

    async fn terminate(&self, process: &str) -> bool {
        if !self.run_ok("pkill", &["-TERM", "-x", process]).await {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        match self.process_running(process).await {
            Ok(false) => true,
            _ => {
                tracing::warn!("{} 未响应 SIGTERM，发送 SIGKILL", process);
                self.run_ok("pkill", &["-KILL", "-x", process]).await
            }
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
impl SystemAutomation {
    /// `wmctrl -c` 只关闭第一个匹配的窗口，这里逐个按窗口 id 关闭
    async fn close_windows_by_title(&self, title: &str) -> bool {
        let output = match self.run("wmctrl", &["-lp"]).await {
            Ok(output) if output.status.success() => output,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!("{}", e);
                return false;
            }
        };

        let ids = linux::matching_window_ids(&String::from_utf8_lossy(&output.stdout), title);
        let mut closed = 0;
        for id in &ids {
            if self.run_ok("wmctrl", &["-i", "-c", id]).await {
                closed += 1;
            }
        }
        tracing::debug!("关闭了 {}/{} 个包含 {} 的窗口", closed, ids.len(), title);
        closed > 0
    }
}

#[cfg(windows)]
#[async_trait]
impl AutomationBackend for SystemAutomation {
    fn name(&self) -> &str {
        "windows"
    }

    async fn launch_default(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let output = self.run("cmd", &["/C", "start", "", &*path]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure(format!(
                "start failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn query_windows_by_title(&self, needle: &str) -> Result<Vec<String>> {
        let output = self.run("tasklist", &["/v", "/fo", "csv", "/nh"]).await?;
        if !output.status.success() {
            return Err(AutoFileError::AutomationFailure("tasklist failed".into()));
        }
        let mut owners = Vec::new();
        for (image, title) in windows::parse_tasklist(&String::from_utf8_lossy(&output.stdout)) {
            if title.contains(needle) && !owners.contains(&image) {
                owners.push(image);
            }
        }
        Ok(owners)
    }

    async fn process_running(&self, process: &str) -> Result<bool> {
        let output = self.run("tasklist", &["/fo", "csv", "/nh"]).await?;
        let image = windows::image_name(process);
        Ok(windows::parse_tasklist(&String::from_utf8_lossy(&output.stdout))
            .iter()
            .any(|(name, _)| format!("{}.exe", name).eq_ignore_ascii_case(&image)))
    }

    async fn run_app_action(&self, app: &str, action: CloseAction, title: &str) -> bool {
        let Some(script) = windows::action_script(action, title) else {
            return self.terminate(app).await;
        };
        self.run_ok("powershell", &["-NoProfile", "-NonInteractive", "-Command", &script])
            .await
    }

    async fn terminate(&self, process: &str) -> bool {
        let image = windows::image_name(process);
        self.run_ok("taskkill", &["/F", "/IM", &image]).await
    }
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod macos {
    use super::CloseAction;

    /// AppleScript 字符串字面量转义
    pub fn escape(s: &str) -> String {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    }

    pub fn window_owners_script(needle: &str) -> String {
        format!(
            r#"tell application "System Events"
    set owners to {{}}
    repeat with proc in (processes whose background only is false)
        try
            if exists (windows of proc whose name contains "{needle}") then
                copy (name of proc) to the end of owners
            end if
        end try
    end repeat
    set AppleScript's text item delimiters to linefeed
    return owners as text
end tell"#,
            needle = escape(needle)
        )
    }

    pub fn process_exists_script(process: &str) -> String {
        format!(
            r#"tell application "System Events" to return (exists process "{}")"#,
            escape(process)
        )
    }

    /// `None` 表示该动作不通过脚本执行（ForceQuit）
    pub fn action_script(app: &str, action: CloseAction, title: &str) -> Option<String> {
        let app = escape(app);
        let title = escape(title);
        let script = match action {
            CloseAction::GracefulCloseByTitle => format!(
                r#"tell application "{app}" to close (every window whose name contains "{title}")"#
            ),
            CloseAction::KeystrokeClose => format!(
                r#"tell application "{app}" to activate
delay 0.2
tell application "System Events" to keystroke "w" using command down"#
            ),
            CloseAction::SaveAndQuit => format!(
                r#"tell application "{app}" to activate
delay 0.2
tell application "System Events" to keystroke "s" using command down
delay 0.5
tell application "{app}" to quit"#
            ),
            CloseAction::ForceQuit => return None,
        };
        Some(script)
    }

    pub fn parse_list(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg_attr(not(all(unix, not(target_os = "macos"))), allow(dead_code))]
mod linux {
    #[derive(Debug, PartialEq)]
    pub struct WmctrlWindow {
        pub id: String,
        pub pid: u32,
        pub title: String,
    }

    /// `wmctrl -lp` 输出：`<id> <desktop> <pid> <host> <title...>`
    pub fn parse_wmctrl(stdout: &str) -> Vec<WmctrlWindow> {
        stdout
            .lines()
            .filter_map(|line| {
                let mut rest = line.trim_start();
                let mut fields = Vec::with_capacity(4);
                for _ in 0..4 {
                    let end = rest.find(char::is_whitespace)?;
                    fields.push(&rest[..end]);
                    rest = rest[end..].trim_start();
                }
                Some(WmctrlWindow {
                    id: fields[0].to_string(),
                    pid: fields[2].parse().unwrap_or(0),
                    title: rest.to_string(),
                })
            })
            .collect()
    }

    /// 标题包含 `needle` 的所有窗口 id
    pub fn matching_window_ids(stdout: &str, needle: &str) -> Vec<String> {
        parse_wmctrl(stdout)
            .into_iter()
            .filter(|w| w.title.contains(needle))
            .map(|w| w.id)
            .collect()
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
mod windows {
    use super::CloseAction;

    /// PowerShell 单引号字符串转义
    pub fn ps_quote(s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    pub fn image_name(process: &str) -> String {
        if process.to_lowercase().ends_with(".exe") {
            process.to_string()
        } else {
            format!("{}.exe", process)
        }
    }

    pub fn action_script(action: CloseAction, title: &str) -> Option<String> {
        let title = ps_quote(title);
        let script = match action {
            CloseAction::GracefulCloseByTitle => format!(
                "$t = [WildcardPattern]::Escape({title}); \
                 $p = Get-Process | Where-Object {{ $_.MainWindowTitle -like \"*$t*\" }}; \
                 if (-not $p) {{ exit 1 }}; \
                 $p | ForEach-Object {{ [void]$_.CloseMainWindow() }}"
            ),
            CloseAction::KeystrokeClose => format!(
                "$ws = New-Object -ComObject WScript.Shell; \
                 if (-not $ws.AppActivate({title})) {{ exit 1 }}; \
                 Start-Sleep -Milliseconds 200; $ws.SendKeys('^w')"
            ),
            CloseAction::SaveAndQuit => format!(
                "$ws = New-Object -ComObject WScript.Shell; \
                 if (-not $ws.AppActivate({title})) {{ exit 1 }}; \
                 Start-Sleep -Milliseconds 200; $ws.SendKeys('^s'); \
                 Start-Sleep -Milliseconds 500; $ws.SendKeys('%{{F4}}')"
            ),
            CloseAction::ForceQuit => return None,
        };
        Some(script)
    }

    /// 解析 `tasklist /fo csv /nh`，返回 (不带 .exe 的映像名, 窗口标题)
    pub fn parse_tasklist(stdout: &str) -> Vec<(String, String)> {
        stdout
            .lines()
            .filter_map(|line| {
                let fields = split_csv_line(line);
                let image = fields.first()?;
                let image = image
                    .strip_suffix(".exe")
                    .or_else(|| image.strip_suffix(".EXE"))
                    .unwrap_or(image)
                    .to_string();
                let title = fields.last().cloned().unwrap_or_default();
                Some((image, title))
            })
            .collect()
    }

    fn split_csv_line(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.trim().chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        if !current.is_empty() || !fields.is_empty() {
            fields.push(current);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applescript_escapes_quotes() {
        let script = macos::action_script("TextEdit", CloseAction::GracefulCloseByTitle, r#"my "notes".txt"#)
            .unwrap();
        assert!(script.contains(r#"whose name contains "my \"notes\".txt""#));
        assert!(macos::action_script("TextEdit", CloseAction::ForceQuit, "x").is_none());
    }

    #[test]
    fn save_and_quit_script_saves_before_quitting() {
        let script = macos::action_script("Microsoft Excel", CloseAction::SaveAndQuit, "budget.csv").unwrap();
        let save = script.find(r#"keystroke "s""#).unwrap();
        let quit = script.find(r#"tell application "Microsoft Excel" to quit"#).unwrap();
        assert!(save < quit);
    }

    #[test]
    fn parses_osascript_list() {
        assert_eq!(macos::parse_list("Preview\nTextEdit\n\n"), vec!["Preview", "TextEdit"]);
        assert!(macos::parse_list("\n").is_empty());
    }

    #[test]
    fn parses_wmctrl_lines() {
        let out = "0x03a00003  0 4242   host report.pdf - Document Viewer\n\
                   0x01200007 -1 0      host Desktop\n\
                   garbage\n";
        let windows = linux::parse_wmctrl(out);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].id, "0x03a00003");
        assert_eq!(windows[0].pid, 4242);
        assert_eq!(windows[0].title, "report.pdf - Document Viewer");
        assert_eq!(windows[1].pid, 0);
    }

    #[test]
    fn every_window_with_the_title_is_targeted() {
        let out = "0x03a00003  0 4242   host report.pdf - Document Viewer\n\
                   0x03a00011  0 4242   host report.pdf (page 2) - Document Viewer\n\
                   0x01200007  0 77     host notes.txt - gedit\n";
        assert_eq!(
            linux::matching_window_ids(out, "report.pdf"),
            vec!["0x03a00003".to_string(), "0x03a00011".to_string()]
        );
        assert!(linux::matching_window_ids(out, "budget.csv").is_empty());
    }

    #[test]
    fn parses_tasklist_csv() {
        let out = "\"EXCEL.EXE\",\"1234\",\"Console\",\"1\",\"80,000 K\",\"Running\",\"PC\\me\",\"0:00:05\",\"budget.csv - Excel\"\r\n\
                   \"notepad.exe\",\"99\",\"Console\",\"1\",\"4,000 K\",\"Running\",\"PC\\me\",\"0:00:00\",\"say \"\"hi\"\".txt - Notepad\"\r\n";
        let rows = windows::parse_tasklist(out);
        assert_eq!(rows[0], ("EXCEL".to_string(), "budget.csv - Excel".to_string()));
        assert_eq!(rows[1], ("notepad".to_string(), "say \"hi\".txt - Notepad".to_string()));
    }

    #[test]
    fn powershell_quoting() {
        assert_eq!(windows::ps_quote("it's.txt"), "'it''s.txt'");
        assert_eq!(windows::image_name("EXCEL"), "EXCEL.exe");
        assert_eq!(windows::image_name("notepad.exe"), "notepad.exe");
        let script = windows::action_script(CloseAction::KeystrokeClose, "a.txt").unwrap();
        assert!(script.contains("AppActivate('a.txt')"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_automation_failure() {
        let backend = SystemAutomation::new(&AutomationConfig::default());
        let err = backend.run("autofile-definitely-missing-binary", &[]).await.unwrap_err();
        assert!(matches!(err, AutoFileError::AutomationFailure(_)));
        assert!(!backend.run_ok("false", &[]).await);
    }
}
