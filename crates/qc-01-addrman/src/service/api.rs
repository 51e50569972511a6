use std::net::{IpAddr, SocketAddr};

use crate::domain::{AddrManError, LoadReport, NetAddress};
use crate::ports::AddressBookApi;
use crate::service::AddressBook;

impl AddressBookApi for AddressBook {
    fn add(&self, address: NetAddress, source: IpAddr, time_penalty: u64) -> bool {
        let now = self.now();
        self.add_at(address, source, time_penalty, now)
    }

    fn good(&self, addr: &SocketAddr) {
        let now = self.now();
        self.good_at(addr, now);
    }

    fn attempt(&self, addr: &SocketAddr) {
        let now = self.now();
        self.attempt_at(addr, now);
    }

    fn connected(&self, addr: &SocketAddr) {
        let now = self.now();
        self.connected_at(addr, now);
    }

    fn select(&self) -> Option<NetAddress> {
        let now = self.now();
        self.select_at(now)
    }

    fn get_addr(&self) -> Vec<NetAddress> {
        let now = self.now();
        self.get_addr_at(now)
    }

    fn size(&self) -> usize {
        self.engine.lock().size()
    }

    fn serialize(&self) -> Result<Vec<u8>, AddrManError> {
        self.engine.lock().serialize()
    }

    fn deserialize(&self, data: &[u8]) -> Result<LoadReport, AddrManError> {
        self.load_blob(data)
    }
}
