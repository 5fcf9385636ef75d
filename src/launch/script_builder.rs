/// Utility for building the contents of a launch script.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
#[derive(Debug)]
pub struct ScriptBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(strbuf: &'a mut String) -> Self {
        Self { strbuf }
    }
}

impl ScriptBuilder<'_> {
    /// shebang line
    pub fn write_shebang(&mut self, interpreter: &str) {
        self.strbuf.clear();
        self.strbuf.push_str("#!");
        self.strbuf.push_str(interpreter);
        self.strbuf.push('\n');
    }

    /// a scheduler directive, e.g. `#PBS -q debug`
    pub fn write_directive(&mut self, prefix: &str, directive: &str) {
        self.strbuf.push_str(prefix);
        self.strbuf.push(' ');
        self.strbuf.push_str(directive);
        self.strbuf.push('\n');
    }

    /// `export NAME="value"`; `$` references in the value are still expanded.
    pub fn write_export(&mut self, var_name: &str, var_val: &str) {
        self.strbuf.push_str("export ");
        self.strbuf.push_str(var_name);
        self.strbuf.push('=');
        self.strbuf.push_str(&quote_expandable(var_val));
        self.strbuf.push('\n');
    }

    /// a line of code, written as-is.
    pub fn write_line(&mut self, code: &str) {
        self.strbuf.push_str(code);
        self.strbuf.push('\n');
    }
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c)
}

/// Quote `arg` so the shell passes it through literally.
pub fn quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_plain) {
        return arg.to_owned();
    }
    format!("'{}'", arg.replace('\'', r#"'"'"'"#))
}

/// Quote `arg` as one word, but leave `$VAR` references for the shell to expand.
pub fn quote_expandable(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| is_plain(c) || "${}".contains(c)) {
        return arg.to_owned();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
