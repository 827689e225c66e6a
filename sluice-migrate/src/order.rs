//! Execution ordering for resolved operations.

use crate::operation::{Operation, OperationKind};

/// Execution band of an operation kind. Lower bands run first.
///
/// Types and tables other statements depend on come into existence early,
/// and everything that references a structure is removed before it.
pub fn priority(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::CreateEnum | OperationKind::AlterEnum => 0,
        OperationKind::DropForeignKey => 1,
        OperationKind::DropIndex => 2,
        OperationKind::DropUniqueConstraint => 3,
        OperationKind::DropPrimaryKey => 4,
        OperationKind::DropColumn => 5,
        OperationKind::DropTable => 6,
        OperationKind::CreateTable => 7,
        OperationKind::RenameTable => 8,
        OperationKind::AddColumn => 9,
        OperationKind::RenameColumn => 10,
        OperationKind::AlterColumn => 11,
        OperationKind::AddPrimaryKey => 12,
        OperationKind::AddUniqueConstraint => 13,
        OperationKind::CreateIndex => 14,
        OperationKind::AddForeignKey => 15,
        OperationKind::DropEnum => 16,
    }
}

/// Sort operations into execution order. Ties keep their input order.
pub fn order_operations(mut operations: Vec<Operation>) -> Vec<Operation> {
    operations.sort_by_key(|op| priority(op.kind()));
    operations
}
