use russh::Preferred;

/// Algorithm preferences shared by the reverse server and outbound tunnel clients.
pub fn default_preferred() -> Preferred {
    Preferred::DEFAULT.clone()
}
