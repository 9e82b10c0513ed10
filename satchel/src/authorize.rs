//! Console authorization flow
//!
//! The engine delegates interactive authorization to its caller; here it
//! is a paste-the-code console exchange against the provider's standard
//! flow. The resulting credential is persisted by the credential store,
//! never handled further by the CLI.

use satchel_engine::credentials::{
    Authorizer, ClientIdentity, StoredCredential, authorization_url, exchange_authorization_code,
};
use satchel_engine::error::CredentialError;
use std::io::{self, Write};

pub struct ConsoleAuthorizer;

impl Authorizer for ConsoleAuthorizer {
    fn authorize(&self, client: &ClientIdentity) -> Result<StoredCredential, CredentialError> {
        let url = authorization_url(client);

        println!("Open this URL in a browser and approve access:");
        println!();
        println!("  {url}");
        println!();
        print!("Paste the authorization code here: ");
        io::stdout().flush().map_err(CredentialError::Io)?;

        let mut code = String::new();
        io::stdin()
            .read_line(&mut code)
            .map_err(CredentialError::Io)?;
        let code = code.trim();

        if code.is_empty() {
            return Err(CredentialError::AuthorizationRequired);
        }

        exchange_authorization_code(client, code)
    }
}
