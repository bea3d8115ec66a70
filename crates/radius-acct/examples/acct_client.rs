use radius_proto::{
    auth::{generate_request_authenticator, verify_accounting_response},
    Attribute, AttributeType, Code, RequestPacket,
};
use std::net::UdpSocket;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <session-id> <secret> [server_addr]", args[0]);
        eprintln!("Example: {} t-800 testing123 127.0.0.1:1813", args[0]);
        std::process::exit(1);
    }

    let session_id = &args[1];
    let secret = args[2].as_bytes();
    let server_addr = args.get(3).map(|s| s.as_str()).unwrap_or("127.0.0.1:1813");

    println!("RADIUS Accounting Client Test");
    println!("=============================");
    println!("Server: {}", server_addr);
    println!("Session: {}", session_id);
    println!();

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(server_addr)?;

    // Accounting-Request for a session stop
    let mut packet = RequestPacket::new(Code::AccountingRequest, 1, generate_request_authenticator());
    packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "testuser")?);
    packet.add_attribute(Attribute::string(AttributeType::AcctSessionId as u8, session_id.as_str())?);
    packet.add_attribute(Attribute::integer(AttributeType::AcctStatusType as u8, 2)?);
    packet.add_attribute(Attribute::ipv4(AttributeType::NasIpAddress as u8, [127, 0, 0, 1])?);
    packet.add_attribute(Attribute::integer(AttributeType::AcctSessionTime as u8, 3600)?);
    packet.add_attribute(Attribute::integer(AttributeType::AcctInputOctets as u8, 1234)?);
    packet.add_attribute(Attribute::integer(AttributeType::AcctOutputOctets as u8, 56789)?);

    // Fills in the Request Authenticator
    let request_data = packet.encode_accounting_request(secret)?;
    println!("Sending Accounting-Request ({} bytes)...", request_data.len());
    socket.send(&request_data)?;

    let mut buffer = vec![0u8; 4096];
    socket.set_read_timeout(Some(std::time::Duration::from_secs(5)))?;

    match socket.recv(&mut buffer) {
        Ok(len) => {
            let response = &buffer[..len];
            println!("Received response ({} bytes)", len);

            if response.first() != Some(&Code::AccountingResponse.as_u8()) {
                println!("\n? Unexpected response code: {:?}", response.first());
                return Ok(());
            }

            match verify_accounting_response(response, &packet.authenticator, secret) {
                Ok(()) => {
                    println!("\nAccounting-Response verified");
                    println!("  Identifier: {}", response[1]);
                }
                Err(e) => println!("\nAccounting-Response failed verification: {}", e),
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("\nNo response from server: {}", e);
            eprintln!("  Make sure the accounting server is running on {}", server_addr);
            Err(e.into())
        }
    }
}
