// Integration-test-only crate; see tests/.
