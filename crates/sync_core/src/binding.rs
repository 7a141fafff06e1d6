use std::sync::Arc;

use anyhow::{anyhow, Result};
use chain_integration::SigningHandle;
use shared::{
    domain::{Address, Generation, TxHash},
    protocol::{CallOutput, ContractCall, ContractInterface, ContractTransaction, GREETER_INTERFACE},
};
use tokio::sync::watch;
use tracing::info;

/// A signer paired with one contract instance. Never mutated; a change of
/// either side produces a new binding with a higher generation.
#[derive(Debug)]
pub struct Binding {
    generation: Generation,
    address: Address,
    interface: &'static ContractInterface,
    signer: SigningHandle,
}

impl Binding {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn interface(&self) -> &'static ContractInterface {
        self.interface
    }

    pub fn signer(&self) -> &SigningHandle {
        &self.signer
    }

    pub async fn greet(&self) -> Result<String> {
        match self.signer.call(&self.address, ContractCall::Greet).await? {
            CallOutput::Text(greeting) => Ok(greeting),
            other => Err(anyhow!("greet() returned {other:?}")),
        }
    }

    pub async fn owner(&self) -> Result<Address> {
        match self.signer.call(&self.address, ContractCall::Owner).await? {
            CallOutput::Address(owner) => Ok(owner),
            other => Err(anyhow!("owner() returned {other:?}")),
        }
    }

    /// Contract balance in wei.
    pub async fn balance(&self) -> Result<String> {
        self.signer.get_balance(&self.address).await
    }

    pub async fn set_greeting(&self, text: &str, payment_wei: u128) -> Result<TxHash> {
        self.signer
            .send_transaction(ContractTransaction::SetGreeting {
                contract: self.address.clone(),
                text: text.to_string(),
                payment_wei,
            })
            .await
    }

    pub async fn withdraw(&self, amount_wei: u128) -> Result<TxHash> {
        self.signer
            .send_transaction(ContractTransaction::Withdraw {
                contract: self.address.clone(),
                amount_wei,
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Unchanged,
    Installed(Arc<Binding>),
    TornDown,
}

/// Owns the single installed binding and the generation counter.
pub struct BindingResolver {
    interface: &'static ContractInterface,
    last_generation: Generation,
    installed: watch::Sender<Option<Arc<Binding>>>,
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingResolver {
    pub fn new() -> Self {
        Self::with_interface(&GREETER_INTERFACE)
    }

    pub fn with_interface(interface: &'static ContractInterface) -> Self {
        let (installed, _) = watch::channel(None);
        Self {
            interface,
            last_generation: Generation::default(),
            installed,
        }
    }

    pub fn current(&self) -> Option<Arc<Binding>> {
        self.installed.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Binding>>> {
        self.installed.subscribe()
    }

    /// Highest generation handed out so far.
    pub fn latest_generation(&self) -> Generation {
        self.last_generation
    }

    /// Reconciles the installed binding with the latest inputs. Callers pass
    /// the freshest values of both, so simultaneous changes collapse into one
    /// rebind.
    pub fn resolve(
        &mut self,
        signer: Option<&SigningHandle>,
        address: Option<&Address>,
    ) -> Resolution {
        let (Some(signer), Some(address)) = (signer, address) else {
            if self.installed.borrow().is_none() {
                return Resolution::Unchanged;
            }
            self.installed.send_replace(None);
            info!("binding: torn down");
            return Resolution::TornDown;
        };

        let up_to_date = self
            .installed
            .borrow()
            .as_ref()
            .is_some_and(|current| current.signer == *signer && current.address == *address);
        if up_to_date {
            return Resolution::Unchanged;
        }

        self.last_generation = self.last_generation.next();
        let binding = Arc::new(Binding {
            generation: self.last_generation,
            address: address.clone(),
            interface: self.interface,
            signer: signer.clone(),
        });
        info!(
            "binding: installed {} generation={} address={} account={}",
            self.interface.name,
            binding.generation,
            binding.address,
            signer.account()
        );
        self.installed.send_replace(Some(Arc::clone(&binding)));
        Resolution::Installed(binding)
    }
}

#[cfg(test)]
#[path = "tests/binding_tests.rs"]
mod tests;
