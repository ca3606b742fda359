use state_machines::state_machine;

state_machine! {
    name: DocumentMachine,
    state: DocumentState,
    initial: Ready,
    states: [Ready, Loaded, Extracted, Indexed, Failed],
    events {
        load { transition: { from: Ready, to: Loaded } }
        extract { transition: { from: Loaded, to: Extracted } }
        index { transition: { from: Extracted, to: Indexed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Loaded, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Indexed, to: Failed }
        }
    }
}

pub fn ready() -> DocumentMachine<(), Ready> {
    DocumentMachine::new(())
}
