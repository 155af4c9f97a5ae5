//! The narrow view of a compute node that actions may consult.

/// A node as seen by the compiler: a name and where to reach it over SSH.
pub trait Node {
    fn name(&self) -> &str;

    /// The address to connect to, if it differs from [Self::name].
    fn address(&self) -> Option<&str>;

    fn ssh_port(&self) -> u16;
}

/// Where controller-side commands reach a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub ssh_port: u16,

    /// The SSH login user. [None] leaves the choice to the SSH configuration.
    pub login: Option<String>,
}

impl Endpoint {
    /// Builds an [Endpoint] for `node`, falling back to its name when no address is known.
    pub fn for_node(node: &dyn Node, login: Option<String>) -> Self {
        Endpoint {
            address: node.address().unwrap_or(node.name()).to_owned(),
            ssh_port: node.ssh_port(),
            login,
        }
    }

    /// `[login@]address`
    pub fn destination(&self) -> String {
        match &self.login {
            Some(login) => format!("{login}@{}", self.address),
            None => self.address.clone(),
        }
    }
}
