/// Default location of the signing policy, before environment expansion.
pub const DEFAULT_POLICY_PATH: &str = "$HOME/.ssh/agent_policies";

/// Default remote stub: `env` exports the forwarded socket and execs the
/// command, so nothing needs to be installed on the remote host.
pub const DEFAULT_STUB: &str = "env";

pub const DEFAULT_SSH_PROGRAM: &str = "ssh";

pub const DEFAULT_PORT: u16 = 22;

/// Expand `$NAME` and `${NAME}` references using `lookup`.
///
/// Unset variables expand to the empty string.  A `$` that does not start a
/// variable name is kept as-is.
pub fn expand_env<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            output.push(ch);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut key = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == '}' {
                    closed = true;
                    break;
                }
                key.push(next);
            }
            if closed {
                output.push_str(&lookup(&key).unwrap_or_default());
            } else {
                output.push_str("${");
                output.push_str(&key);
            }
            continue;
        }
        let mut key = String::new();
        while let Some(&next) = chars.peek() {
            if next == '_' || next.is_ascii_alphanumeric() {
                key.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if key.is_empty() {
            output.push('$');
        } else {
            output.push_str(&lookup(&key).unwrap_or_default());
        }
    }
    output
}
