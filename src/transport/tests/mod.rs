mod test_tcp;
mod test_udp;
mod test_via_received;
